//! Live match loop: tick arming and the per-frame work.
//!
//! A tick runs only when armed, and arming is consumed by the tick. The
//! session re-arms after each tick while the camera stays on, so turning the
//! camera off ends the loop at the next tick boundary.

use crate::view::Overlay;
use facematch_core::{Descriptor, FacePipeline, MatchState, Matcher, PipelineError};
use facematch_hw::{CameraController, CameraError, CaptureBackend, FrameError};
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TickError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was scheduled.
    Idle,
    /// The frame was handled and the next tick is armed.
    Rescheduled,
    /// The loop ended; nothing further is scheduled.
    Stopped,
}

#[derive(Debug, Default)]
pub struct LiveLoop {
    armed: bool,
    ticks: u64,
}

impl LiveLoop {
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn arm(&mut self) {
        if !self.armed {
            tracing::trace!(ticks = self.ticks, "live match loop armed");
        }
        self.armed = true;
    }

    /// Consume the arming; `false` if no tick was scheduled.
    pub fn begin_tick(&mut self) -> bool {
        let scheduled = std::mem::take(&mut self.armed);
        if scheduled {
            self.ticks += 1;
        }
        scheduled
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Result of one frame: the image, what to draw on it, and the verdict.
pub struct ProcessedFrame {
    pub image: GrayImage,
    pub overlay: Overlay,
    pub state: MatchState,
}

/// Grab a frame, describe every face and score it against the reference.
pub fn process_frame<P, B, M>(
    pipeline: &mut P,
    camera: &mut CameraController<B>,
    reference: &Descriptor,
    matcher: &M,
) -> Result<ProcessedFrame, TickError>
where
    P: FacePipeline,
    B: CaptureBackend,
    M: Matcher,
{
    let frame = camera.grab()?;
    let image = frame.to_luma_image()?;
    // The overlay surface always takes the current frame's size.
    let (width, height) = image.dimensions();

    let faces = pipeline.detect_all(&image)?;
    let result = matcher.compare(reference, faces);
    tracing::trace!(
        sequence = frame.sequence,
        faces = result.faces.len(),
        best = ?result.state.best_distance,
        "frame processed"
    );

    Ok(ProcessedFrame {
        overlay: Overlay::build(width, height, &result),
        state: result.state,
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_requires_arming() {
        let mut live = LiveLoop::default();
        assert!(!live.begin_tick());
        live.arm();
        assert!(live.is_armed());
        assert!(live.begin_tick());
        assert!(!live.is_armed());
        assert!(!live.begin_tick());
        assert_eq!(live.ticks(), 1);
    }

    #[test]
    fn test_double_arm_schedules_one_tick() {
        let mut live = LiveLoop::default();
        live.arm();
        live.arm();
        assert!(live.begin_tick());
        assert!(!live.begin_tick());
    }
}
