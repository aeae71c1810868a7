//! Luminance frames delivered by the camera pipeline.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("empty frame buffer")]
    Empty,
    #[error("frame dimensions {width}x{height} are out of range")]
    Dimensions { width: u32, height: u32 },
    #[error("frame buffer holds {actual} samples, {width}x{height} needs {expected}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("artifact encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Samples a `width` x `height` luminance plane needs, or `None` when either
/// dimension is zero or the product does not fit in `usize`.
pub fn sample_count(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .filter(|&n| n > 0)
}

/// A single 8-bit luminance (Y plane) frame, row-major, one byte per pixel.
///
/// The first `width * height` bytes are the image. Camera planes often carry
/// trailing padding after the last row; bytes past the image are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Number of samples the declared dimensions require.
    pub fn expected_len(&self) -> Option<usize> {
        sample_count(self.width, self.height)
    }

    /// The image samples, without any trailing padding.
    pub fn pixels(&self) -> Result<&[u8], FrameError> {
        if self.data.is_empty() {
            return Err(FrameError::Empty);
        }
        let expected = self.expected_len().ok_or(FrameError::Dimensions {
            width: self.width,
            height: self.height,
        })?;
        self.data
            .get(..expected)
            .ok_or(FrameError::SizeMismatch {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            })
    }

    /// Check that the buffer is non-empty and covers its declared dimensions.
    pub fn check(&self) -> Result<(), FrameError> {
        self.pixels().map(|_| ())
    }

    /// Encode the frame as a grayscale JPEG at the given quality (1-100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let pixels = self.pixels()?;
        let mut out = Vec::with_capacity(pixels.len() / 4);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
            pixels,
            self.width,
            self.height,
            ExtendedColorType::L8,
        )?;
        Ok(out)
    }
}
