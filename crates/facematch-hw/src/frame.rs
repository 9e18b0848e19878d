//! Frame type and pixel conversion.

use image::GrayImage;

/// A captured greyscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Greyscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an existing greyscale image (uploads, tests).
    pub fn from_luma(image: GrayImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
        }
    }

    /// Copy into an `image` buffer for detection and drawing.
    pub fn to_luma_image(&self) -> Result<GrayImage, FrameError> {
        let expected = (self.width * self.height) as usize;
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            },
        )
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Convert packed YUYV (4:2:2) to greyscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let gray = yuyv_to_grayscale(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_trailing_bytes_ignored() {
        let yuyv: Vec<u8> = (0..20).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_luma_roundtrip_keeps_pixels() {
        let mut image = GrayImage::new(3, 2);
        image.put_pixel(2, 1, image::Luma([77]));
        let frame = Frame::from_luma(image.clone(), 5);
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.to_luma_image().unwrap(), image);
    }

    #[test]
    fn test_to_luma_image_rejects_short_buffer() {
        let frame = Frame {
            data: vec![0; 5],
            width: 3,
            height: 2,
            sequence: 0,
        };
        assert!(matches!(
            frame.to_luma_image(),
            Err(FrameError::InvalidLength {
                expected: 6,
                actual: 5,
            })
        ));
    }
}
