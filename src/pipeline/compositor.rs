use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::pipeline::boundary::FaceBoundary;
use crate::pipeline::error::{ErrorKind, TransformError};
use crate::pipeline::mask::HairMask;
use crate::pipeline::photo::{Photo, PhotoError};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BlendThresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for BlendThresholds {
    fn default() -> Self {
        Self {
            low: 0.2,
            high: 0.8,
        }
    }
}

impl BlendThresholds {
    pub fn is_valid(&self) -> bool {
        self.low.is_finite()
            && self.high.is_finite()
            && 0.0 <= self.low
            && self.low < self.high
            && self.high <= 1.0
    }

    /// Largest mask value that still keeps the original pixel.
    pub fn protected_max_value(&self) -> u8 {
        (self.low * f32::from(HairMask::MAX)).floor().clamp(0.0, 255.0) as u8
    }
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("mask is {mask_width}x{mask_height} but the original photo is {width}x{height}")]
    MaskMismatch {
        width: u32,
        height: u32,
        mask_width: u32,
        mask_height: u32,
    },
    #[error("candidate could not be resampled to {width}x{height}: {source}")]
    Resample {
        width: u32,
        height: u32,
        #[source]
        source: PhotoError,
    },
    #[error("overlay raster could not be built: {0}")]
    Overlay(#[source] PhotoError),
}

impl From<CompositeError> for TransformError {
    fn from(error: CompositeError) -> Self {
        TransformError::new(ErrorKind::DimensionMismatch, error.to_string())
    }
}

/// Blends a candidate into the original under a hair mask. Pixels whose mask
/// weight is at or below the low threshold are copied from the original
/// bit for bit.
#[derive(Debug, Clone, Default)]
pub struct IdentityCompositor {
    thresholds: BlendThresholds,
}

impl IdentityCompositor {
    pub fn new(thresholds: BlendThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &BlendThresholds {
        &self.thresholds
    }

    pub fn composite(
        &self,
        original: &Photo,
        candidate: &Photo,
        mask: &HairMask,
    ) -> Result<Photo, CompositeError> {
        let (width, height) = original.dimensions();
        if mask.dimensions() != (width, height) {
            return Err(CompositeError::MaskMismatch {
                width,
                height,
                mask_width: mask.width(),
                mask_height: mask.height(),
            });
        }
        if candidate.dimensions() != (width, height) {
            debug!(
                from = ?candidate.dimensions(),
                to = ?(width, height),
                "resampling candidate to original dimensions"
            );
        }
        let candidate = candidate
            .resized(width, height)
            .map_err(|source| CompositeError::Resample {
                width,
                height,
                source,
            })?;

        let src = original.rgba();
        let cand = candidate.rgba();
        let low = self.thresholds.low;
        let high = self.thresholds.high;
        let out = RgbaImage::from_fn(width, height, |x, y| {
            let alpha = mask.alpha_at(x, y);
            let o = src.get_pixel(x, y);
            if alpha <= low {
                *o
            } else if alpha >= high {
                *cand.get_pixel(x, y)
            } else {
                lerp_pixel(o, cand.get_pixel(x, y), alpha)
            }
        });
        Photo::from_rgba(out).map_err(|source| CompositeError::Resample {
            width,
            height,
            source,
        })
    }

    /// Builds an overlay candidate: the sprite is scaled so its face width
    /// matches the user's, aligned on face centre and hairline, then
    /// alpha-blended over the original. The result still has to go through
    /// [`Self::composite`] with the user's mask.
    pub fn compose_overlay(
        &self,
        original: &Photo,
        sprite: &Photo,
        user_boundary: &FaceBoundary,
        sprite_boundary: &FaceBoundary,
    ) -> Result<Photo, CompositeError> {
        let (width, height) = original.dimensions();
        let (sprite_w, sprite_h) = sprite.dimensions();
        let user_face_px = (user_boundary.face_width().abs() * width as f32).max(1.0);
        let sprite_face_px = (sprite_boundary.face_width().abs() * sprite_w as f32).max(1.0);
        let scale = user_face_px / sprite_face_px;

        let scaled_w = ((sprite_w as f32 * scale).round() as u32).clamp(1, width.saturating_mul(4));
        let scaled_h =
            ((sprite_h as f32 * scale).round() as u32).clamp(1, height.saturating_mul(4));
        let scaled = if (scaled_w, scaled_h) == (sprite_w, sprite_h) {
            sprite.rgba().clone()
        } else {
            image::imageops::resize(sprite.rgba(), scaled_w, scaled_h, FilterType::Lanczos3)
        };

        let sx = scaled_w as f32 / sprite_w as f32;
        let sy = scaled_h as f32 / sprite_h as f32;
        let offset_x = user_boundary.face_center_x() * width as f32
            - sprite_boundary.face_center_x() * sprite_w as f32 * sx;
        let offset_y = user_boundary.forehead_top * height as f32
            - sprite_boundary.forehead_top * sprite_h as f32 * sy;
        let offset_x = offset_x.round() as i64;
        let offset_y = offset_y.round() as i64;

        let mut out = original.rgba().clone();
        for (x, y, pixel) in scaled.enumerate_pixels() {
            let tx = x as i64 + offset_x;
            let ty = y as i64 + offset_y;
            if tx < 0 || ty < 0 || tx >= width as i64 || ty >= height as i64 {
                continue;
            }
            let sprite_alpha = f32::from(pixel[3]) / 255.0;
            if sprite_alpha <= 0.0 {
                continue;
            }
            let dst = out.get_pixel_mut(tx as u32, ty as u32);
            let blended = lerp_pixel(dst, pixel, sprite_alpha);
            *dst = Rgba([blended[0], blended[1], blended[2], dst[3]]);
        }
        Photo::from_rgba(out).map_err(CompositeError::Overlay)
    }
}

fn lerp_pixel(original: &Rgba<u8>, candidate: &Rgba<u8>, alpha: f32) -> Rgba<u8> {
    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().enumerate() {
        let o = f32::from(original[i]);
        let c = f32::from(candidate[i]);
        *channel = (o * (1.0 - alpha) + c * alpha).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}
