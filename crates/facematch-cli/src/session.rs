//! Session state: models, camera, reference and the latest verdict.
//!
//! All mutation goes through [`Session`], driven one event at a time by the
//! main loop (commands, model readiness, live ticks).

use crate::command::{Command, HELP};
use crate::live::{self, LiveLoop, TickOutcome};
use crate::view::{Controls, View};
use facematch_core::{
    Descriptor, EuclideanMatcher, FacePipeline, MatchPolicy, MatchState, PipelineError,
};
use facematch_hw::{CameraController, CameraError, CaptureBackend, FrameError};
use image::GrayImage;
use serde::Serialize;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures surfaced to the user as alerts.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("models are still loading, please wait")]
    ModelsNotReady,
    #[error("face models failed to load: {0}")]
    ModelsFailed(String),
    #[error("no reference photo yet; upload one first")]
    NoReference,
    #[error("camera is off; start it first")]
    CameraOff,
    #[error("cannot access camera: {0}")]
    Camera(#[from] CameraError),
    #[error("cannot read image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face detected in the uploaded image")]
    NoFaceInUpload,
    #[error("no face detected in the captured image")]
    NoFaceInCapture,
    #[error("bad camera frame: {0}")]
    Frame(#[from] FrameError),
    #[error("face analysis failed: {0}")]
    Pipeline(#[from] PipelineError),
}

enum Models<P> {
    Loading,
    Ready(P),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum ReferenceSource {
    Upload(PathBuf),
    Camera,
}

/// The reference photo and its descriptor. Always replaced together.
pub struct Reference {
    pub image: GrayImage,
    pub descriptor: Descriptor,
    pub source: ReferenceSource,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub models: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_error: Option<String>,
    pub camera_on: bool,
    pub camera_dimensions: Option<(u32, u32)>,
    pub reference: Option<ReferenceSource>,
    pub reference_size: Option<(u32, u32)>,
    pub reference_model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_warning: Option<String>,
    pub live: bool,
    pub frames_processed: u64,
    pub last_result: Option<MatchState>,
    pub controls: Controls,
}

pub struct Session<P: FacePipeline, B: CaptureBackend> {
    models: Models<P>,
    camera: CameraController<B>,
    reference: Option<Reference>,
    match_state: Option<MatchState>,
    matcher: EuclideanMatcher,
    live: LiveLoop,
}

impl<P: FacePipeline, B: CaptureBackend> Session<P, B> {
    pub fn new(camera: CameraController<B>, policy: MatchPolicy) -> Self {
        Self {
            models: Models::Loading,
            camera,
            reference: None,
            match_state: None,
            matcher: EuclideanMatcher::new(policy),
            live: LiveLoop::default(),
        }
    }

    pub fn models_loaded(&mut self, pipeline: P) {
        tracing::info!("face models ready");
        self.models = Models::Ready(pipeline);
        self.sync_live();
    }

    pub fn models_failed(&mut self, reason: String) {
        tracing::error!(%reason, "face models unavailable");
        self.models = Models::Failed(reason);
    }

    pub fn models_ready(&self) -> bool {
        matches!(self.models, Models::Ready(_))
    }

    fn pipeline(&mut self) -> Result<&mut P, SessionError> {
        match &mut self.models {
            Models::Ready(pipeline) => Ok(pipeline),
            Models::Loading => Err(SessionError::ModelsNotReady),
            Models::Failed(reason) => Err(SessionError::ModelsFailed(reason.clone())),
        }
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn match_state(&self) -> Option<&MatchState> {
        self.match_state.as_ref()
    }

    pub fn camera_on(&self) -> bool {
        self.camera.is_on()
    }

    pub fn live_armed(&self) -> bool {
        self.live.is_armed()
    }

    pub fn controls(&self) -> Controls {
        let ready = self.models_ready();
        let on = self.camera.is_on();
        Controls {
            upload: ready,
            capture: ready && on,
            camera: ready && self.reference.is_some(),
            camera_label: if on { "Stop Camera" } else { "Start Camera" },
        }
    }

    /// Decode a photo, describe its most confident face and make it the reference.
    /// Nothing changes unless a face is found.
    pub fn upload_reference(
        &mut self,
        path: &Path,
        view: &mut impl View,
    ) -> Result<(), SessionError> {
        let pipeline = self.pipeline()?;
        let image = image::open(path)
            .map_err(|source| SessionError::ImageDecode {
                path: path.to_path_buf(),
                source,
            })?
            .to_luma8();

        let face = pipeline
            .detect_single(&image)?
            .ok_or(SessionError::NoFaceInUpload)?;
        tracing::info!(
            path = %path.display(),
            confidence = face.bbox.confidence,
            "reference uploaded"
        );

        view.show_reference(&image);
        self.reference = Some(Reference {
            image,
            descriptor: face.descriptor,
            source: ReferenceSource::Upload(path.to_path_buf()),
        });
        self.sync_live();
        Ok(())
    }

    /// Take the reference from the camera. The displayed snapshot and the
    /// frame used for detection are two consecutive grabs.
    pub fn capture_reference(&mut self, view: &mut impl View) -> Result<(), SessionError> {
        self.pipeline()?;
        if !self.camera.is_on() {
            return Err(SessionError::CameraOff);
        }

        let snapshot = self.camera.grab()?.to_luma_image()?;
        let live = self.camera.grab()?.to_luma_image()?;

        let pipeline = self.pipeline()?;
        let face = pipeline
            .detect_single(&live)?
            .ok_or(SessionError::NoFaceInCapture)?;
        tracing::info!(confidence = face.bbox.confidence, "reference captured from camera");

        view.show_reference(&snapshot);
        self.reference = Some(Reference {
            image: snapshot,
            descriptor: face.descriptor,
            source: ReferenceSource::Camera,
        });
        self.sync_live();
        Ok(())
    }

    pub fn start_camera(&mut self) -> Result<(), SessionError> {
        self.pipeline()?;
        if self.reference.is_none() {
            return Err(SessionError::NoReference);
        }
        self.camera.start()?;
        self.sync_live();
        Ok(())
    }

    pub fn stop_camera(&mut self) {
        self.camera.stop();
    }

    /// Start or stop the camera; returns whether it is now on.
    pub fn toggle_camera(&mut self) -> Result<bool, SessionError> {
        if self.camera.is_on() {
            self.stop_camera();
        } else {
            self.start_camera()?;
        }
        Ok(self.camera.is_on())
    }

    fn sync_live(&mut self) {
        if self.camera.is_on() && self.reference.is_some() && self.models_ready() {
            self.live.arm();
        }
    }

    /// Run one scheduled iteration of the live match loop.
    pub fn tick(&mut self, view: &mut impl View) -> TickOutcome {
        if !self.live.begin_tick() {
            return TickOutcome::Idle;
        }
        if !self.camera.is_on() {
            tracing::debug!("camera off, live match loop stopped");
            return TickOutcome::Stopped;
        }
        let (Models::Ready(pipeline), Some(reference)) = (&mut self.models, &self.reference) else {
            return TickOutcome::Stopped;
        };

        let processed = live::process_frame(
            pipeline,
            &mut self.camera,
            &reference.descriptor,
            &self.matcher,
        );
        match processed {
            Ok(frame) => {
                view.draw_overlay(&frame.image, &frame.overlay);
                view.show_result(&frame.state);
                self.match_state = Some(frame.state);
            }
            Err(e) => tracing::warn!(error = %e, "live frame skipped"),
        }

        if self.camera.is_on() {
            self.live.arm();
            TickOutcome::Rescheduled
        } else {
            TickOutcome::Stopped
        }
    }

    pub fn status(&self) -> StatusReport {
        let (models, model_error) = match &self.models {
            Models::Loading => ("loading", None),
            Models::Ready(_) => ("ready", None),
            Models::Failed(reason) => ("failed", Some(reason.clone())),
        };
        StatusReport {
            models,
            model_error,
            camera_on: self.camera.is_on(),
            camera_dimensions: self.camera.dimensions(),
            reference: self.reference.as_ref().map(|r| r.source.clone()),
            reference_size: self.reference.as_ref().map(|r| r.image.dimensions()),
            reference_model_version: self
                .reference
                .as_ref()
                .and_then(|r| r.descriptor.model_version.clone()),
            policy_warning: self.matcher.policy.calibration_warning(),
            live: self.live.is_armed(),
            frames_processed: self.live.ticks(),
            last_result: self.match_state,
            controls: self.controls(),
        }
    }

    /// Apply one user command. Errors become alerts; only `quit` breaks.
    pub fn handle(&mut self, command: Command, view: &mut impl View) -> ControlFlow<()> {
        let result = match command {
            Command::Upload(path) => self.upload_reference(&path, view),
            Command::Capture => self.capture_reference(view),
            Command::Camera => self.toggle_camera().map(|on| {
                view.notice(if on { "camera on" } else { "camera off" });
            }),
            Command::Status => {
                match serde_json::to_string_pretty(&self.status()) {
                    Ok(json) => view.notice(&json),
                    Err(e) => tracing::warn!(error = %e, "could not serialize status"),
                }
                Ok(())
            }
            Command::Help => {
                view.notice(HELP);
                Ok(())
            }
            Command::Quit => return ControlFlow::Break(()),
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "command rejected");
            view.alert(&e.to_string());
        }
        ControlFlow::Continue(())
    }
}
