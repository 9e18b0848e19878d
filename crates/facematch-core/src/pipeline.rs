//! Detection + description pipeline: image in, faces with descriptors out.

use crate::detector::{DetectorError, FaceDetector};
use crate::models::LoadedModels;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceDescription;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face analysis used by reference capture and the live match loop.
///
/// Implementations may hold inference sessions, hence `&mut self`.
pub trait FacePipeline {
    /// The single most confident face with its descriptor, if any.
    fn detect_single(
        &mut self,
        image: &GrayImage,
    ) -> Result<Option<FaceDescription>, PipelineError>;

    /// Every face in the image with its descriptor, most confident first.
    fn detect_all(&mut self, image: &GrayImage) -> Result<Vec<FaceDescription>, PipelineError>;
}

/// SCRFD detection followed by ArcFace description.
pub struct OnnxPipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxPipeline {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }
}

impl From<LoadedModels> for OnnxPipeline {
    fn from(models: LoadedModels) -> Self {
        Self::new(models.detector, models.recognizer)
    }
}

impl FacePipeline for OnnxPipeline {
    fn detect_single(
        &mut self,
        image: &GrayImage,
    ) -> Result<Option<FaceDescription>, PipelineError> {
        let faces = self.detector.detect(image)?;
        let Some(bbox) = faces.into_iter().next() else {
            return Ok(None);
        };
        tracing::debug!(confidence = bbox.confidence, "single face selected");
        let descriptor = self.recognizer.extract(image, &bbox)?;
        Ok(Some(FaceDescription { bbox, descriptor }))
    }

    fn detect_all(&mut self, image: &GrayImage) -> Result<Vec<FaceDescription>, PipelineError> {
        let faces = self.detector.detect(image)?;
        faces
            .into_iter()
            .map(|bbox| -> Result<FaceDescription, PipelineError> {
                let descriptor = self.recognizer.extract(image, &bbox)?;
                Ok(FaceDescription { bbox, descriptor })
            })
            .collect()
    }
}
