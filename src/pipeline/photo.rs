use std::io::Cursor;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};
use thiserror::Error;

use crate::pipeline::error::{ErrorKind, TransformError};

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("photo bytes are empty")]
    Empty,
    #[error("photo has zero width or height")]
    ZeroDimensions,
    #[error("failed to decode photo: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode photo: {0}")]
    Encode(#[source] image::ImageError),
}

impl From<PhotoError> for TransformError {
    fn from(error: PhotoError) -> Self {
        TransformError::new(ErrorKind::InvalidInput, error.to_string())
    }
}

/// Immutable RGBA raster. Clones share the pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pixels: Arc<RgbaImage>,
}

impl Photo {
    pub fn from_rgba(pixels: RgbaImage) -> Result<Self, PhotoError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(PhotoError::ZeroDimensions);
        }
        Ok(Self {
            pixels: Arc::new(pixels),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PhotoError> {
        if bytes.is_empty() {
            return Err(PhotoError::Empty);
        }
        let decoded = image::load_from_memory(bytes).map_err(PhotoError::Decode)?;
        Self::from_rgba(decoded.to_rgba8())
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, PhotoError> {
        let mut out = Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut out, ImageFormat::Png)
            .map_err(PhotoError::Encode)?;
        Ok(out.into_inner())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn rgba(&self) -> &RgbaImage {
        self.pixels.as_ref()
    }

    /// Returns `self` unchanged when the size already matches.
    pub fn resized(&self, width: u32, height: u32) -> Result<Self, PhotoError> {
        if self.dimensions() == (width, height) {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(PhotoError::ZeroDimensions);
        }
        Self::from_rgba(image::imageops::resize(
            self.pixels.as_ref(),
            width,
            height,
            FilterType::Lanczos3,
        ))
    }
}
