//! Camera on/off lifecycle over a pluggable capture backend.
//!
//! The controller owns at most one stream. Starting while a stream is bound
//! releases the old one first; stopping an idle controller is a no-op.

use crate::camera::CameraError;
use crate::frame::Frame;

/// Requested capture size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// A running capture stream. Dropping it releases the device.
pub trait VideoStream {
    fn grab(&mut self) -> Result<Frame, CameraError>;
    fn dimensions(&self) -> (u32, u32);
}

/// Something that can open capture streams.
pub trait CaptureBackend {
    type Stream: VideoStream;

    fn acquire(&mut self, constraints: &StreamConstraints) -> Result<Self::Stream, CameraError>;
}

pub struct CameraController<B: CaptureBackend> {
    backend: B,
    constraints: StreamConstraints,
    stream: Option<B::Stream>,
}

impl<B: CaptureBackend> CameraController<B> {
    pub fn new(backend: B, constraints: StreamConstraints) -> Self {
        Self {
            backend,
            constraints,
            stream: None,
        }
    }

    /// Acquire a stream and bind it. On failure the controller is left off.
    pub fn start(&mut self) -> Result<(), CameraError> {
        self.stop();
        match self.backend.acquire(&self.constraints) {
            Ok(stream) => {
                let (width, height) = stream.dimensions();
                tracing::info!(width, height, "camera started");
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera start failed");
                Err(e)
            }
        }
    }

    /// Release the bound stream, if any.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("camera stopped");
        }
    }

    pub fn is_on(&self) -> bool {
        self.stream.is_some()
    }

    pub fn grab(&mut self) -> Result<Frame, CameraError> {
        self.stream
            .as_mut()
            .ok_or(CameraError::NotStreaming)?
            .grab()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(VideoStream::dimensions)
    }
}
