//! Presentation: control enablement, overlay rendering and terminal output.

use facematch_core::{FrameMatch, MatchState, MatchTier};
use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Which controls can be used in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub upload: bool,
    pub capture: bool,
    pub camera: bool,
    pub camera_label: &'static str,
}

/// One labelled face box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub label: String,
    pub tier: MatchTier,
}

/// Everything drawn over one frame. Sized to the frame it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<OverlayBox>,
}

impl Overlay {
    pub fn build(width: u32, height: u32, frame_match: &FrameMatch) -> Self {
        let boxes = frame_match
            .faces
            .iter()
            .map(|scored| {
                let b = scored.face.bbox.clamped(width, height);
                OverlayBox {
                    x: b.x.round() as i32,
                    y: b.y.round() as i32,
                    width: b.width.round() as u32,
                    height: b.height.round() as u32,
                    label: format!("Distance: {:.2}", scored.distance),
                    tier: scored.tier,
                }
            })
            .collect();

        Self {
            width,
            height,
            boxes,
        }
    }

    /// Draw the boxes over a colour copy of `frame`.
    pub fn render(&self, frame: &GrayImage) -> RgbImage {
        let mut canvas = DynamicImage::ImageLuma8(frame.clone()).to_rgb8();
        for b in &self.boxes {
            if b.width < 3 || b.height < 3 {
                continue;
            }
            let color = tier_color(b.tier);
            // Two nested rectangles for a 2px outline
            draw_hollow_rect_mut(&mut canvas, Rect::at(b.x, b.y).of_size(b.width, b.height), color);
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(b.x + 1, b.y + 1).of_size(b.width - 2, b.height - 2),
                color,
            );
        }
        canvas
    }
}

pub fn tier_color(tier: MatchTier) -> Rgb<u8> {
    match tier {
        MatchTier::Strong => Rgb([0, 200, 0]),
        MatchTier::Borderline => Rgb([255, 165, 0]),
        MatchTier::NoMatch => Rgb([220, 0, 0]),
    }
}

/// Output surface driven by the session.
pub trait View {
    /// A user-facing error, shown immediately.
    fn alert(&mut self, message: &str);
    fn show_reference(&mut self, image: &GrayImage);
    fn draw_overlay(&mut self, frame: &GrayImage, overlay: &Overlay);
    fn show_result(&mut self, state: &MatchState);
    fn notice(&mut self, message: &str);
}

/// Prints to the terminal and writes images into an output directory.
pub struct TerminalView {
    output_dir: PathBuf,
    last_summary: Option<String>,
}

impl TerminalView {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            last_summary: None,
        }
    }

    pub fn reference_path(&self) -> PathBuf {
        self.output_dir.join("reference.png")
    }

    pub fn overlay_path(&self) -> PathBuf {
        self.output_dir.join("overlay.png")
    }
}

impl View for TerminalView {
    fn alert(&mut self, message: &str) {
        eprintln!("! {message}");
    }

    fn show_reference(&mut self, image: &GrayImage) {
        let path = self.reference_path();
        match write_png(&path, &DynamicImage::ImageLuma8(image.clone())) {
            Ok(()) => println!("reference photo saved to {}", path.display()),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "could not write reference image"
            ),
        }
    }

    fn draw_overlay(&mut self, frame: &GrayImage, overlay: &Overlay) {
        let path = self.overlay_path();
        let rendered = DynamicImage::ImageRgb8(overlay.render(frame));
        if let Err(e) = write_png(&path, &rendered) {
            tracing::warn!(path = %path.display(), error = %e, "could not write overlay");
        }
        let labels = self.output_dir.join("overlay.json");
        let written = serde_json::to_vec_pretty(overlay)
            .map_err(std::io::Error::other)
            .and_then(|json| write_atomic(&labels, &json));
        if let Err(e) = written {
            tracing::warn!(path = %labels.display(), error = %e, "could not write overlay labels");
        }
    }

    fn show_result(&mut self, state: &MatchState) {
        let summary = state.summary();
        if self.last_summary.as_deref() != Some(summary.as_str()) {
            println!("{summary}");
            self.last_summary = Some(summary);
        }
    }

    fn notice(&mut self, message: &str) {
        println!("{message}");
    }
}

/// Write via a sibling temp file and rename, so readers never see a partial image.
fn write_png(path: &Path, image: &DynamicImage) -> Result<(), image::ImageError> {
    let part = path.with_extension("png.part");
    image.save_with_format(&part, ImageFormat::Png)?;
    fs::rename(&part, path)?;
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let part = path.with_extension("part");
    fs::write(&part, bytes)?;
    fs::rename(&part, path)
}
