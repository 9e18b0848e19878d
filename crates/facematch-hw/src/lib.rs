//! facematch-hw: Camera capture and stream lifecycle.
//!
//! Provides V4L2-based camera access behind a small backend trait so the
//! on/off lifecycle can be driven without hardware.

pub mod camera;
pub mod controller;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, V4lBackend};
pub use controller::{CameraController, CaptureBackend, StreamConstraints, VideoStream};
pub use frame::{Frame, FrameError};
