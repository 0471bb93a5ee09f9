//! Image decoding seam: raw pixel buffers and the decoder used by tile loaders.

use std::path::Path;

use crate::error::{GraphicsError, SurfaceError};

/// A decoded image: tightly packed 8-bit pixels, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel (1 = gray, 3 = RGB, 4 = RGBA).
    pub channels: u8,
    /// `width * height * channels` bytes.
    pub bytes: Vec<u8>,
}

impl DecodedImage {
    /// Build an image from raw parts without validation.
    #[must_use]
    pub fn new(width: u32, height: u32, channels: u8, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            bytes,
        }
    }

    /// A single-color image, handy for placeholders.
    #[must_use]
    pub fn filled(width: u32, height: u32, pixel: &[u8]) -> Self {
        let count = width as usize * height as usize;
        let bytes = pixel.repeat(count);
        Self::new(width, height, pixel.len() as u8, bytes)
    }

    /// Byte length implied by the dimensions and channel count.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Check the buffer is uploadable.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::ZeroDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if !(1..=4).contains(&self.channels) {
            return Err(GraphicsError::UnsupportedChannels(self.channels));
        }
        let expected = self.expected_len();
        if self.bytes.len() != expected {
            return Err(GraphicsError::DataSizeMismatch {
                actual: self.bytes.len(),
                expected,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Decodes an image file into raw pixels.
///
/// Called from loader worker threads, hence `Send + Sync`.
pub trait ImageDecoder: Send + Sync {
    /// Decode the file at `path`.
    fn decode(&self, path: &Path) -> Result<DecodedImage, SurfaceError>;
}

impl<F> ImageDecoder for F
where
    F: Fn(&Path) -> Result<DecodedImage, SurfaceError> + Send + Sync,
{
    fn decode(&self, path: &Path) -> Result<DecodedImage, SurfaceError> {
        self(path)
    }
}

/// Decoder backed by the `image` crate.
///
/// Keeps the file's channel layout and narrows 16-bit samples to 8 bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngDecoder;

impl ImageDecoder for PngDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage, SurfaceError> {
        let img = image::open(path).map_err(|source| SurfaceError::ResourceMissing {
            path: path.to_path_buf(),
            source,
        })?;
        let (width, height) = (img.width(), img.height());
        let (channels, bytes) = match img.color().channel_count() {
            1 => (1, img.into_luma8().into_raw()),
            2 => (2, img.into_luma_alpha8().into_raw()),
            3 => (3, img.into_rgb8().into_raw()),
            _ => (4, img.into_rgba8().into_raw()),
        };
        Ok(DecodedImage::new(width, height, channels, bytes))
    }
}
