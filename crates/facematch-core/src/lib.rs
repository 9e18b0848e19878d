//! facematch-core: Face detection, description and matching.
//!
//! Uses SCRFD for face detection and ArcFace for face descriptors,
//! both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod detector;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorOptions, FaceDetector};
pub use matching::{
    EuclideanMatcher, FrameMatch, MatchPolicy, MatchState, MatchTier, Matcher, ScoredFace,
};
pub use models::{default_model_dir, ModelBase, ModelError, ModelLoader};
pub use pipeline::{FacePipeline, OnnxPipeline, PipelineError};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Descriptor, FaceDescription};
