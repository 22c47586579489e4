use image::{GrayImage, Luma};
use serde::Deserialize;
use tracing::warn;

use crate::pipeline::boundary::FaceBoundary;
use crate::pipeline::photo::Photo;

/// Region ratios for mask synthesis. Horizontal factors are relative to the
/// face width; vertical ones to the image height.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MaskGeometry {
    pub top_width_factor: f32,
    pub side_width_factor: f32,
    pub forehead_margin: f32,
    pub feather_fraction: f32,
    pub min_feather_px: u32,
    pub min_face_width: f32,
    pub fallback_cutoff: f32,
}

impl Default for MaskGeometry {
    fn default() -> Self {
        Self {
            top_width_factor: 1.8,
            side_width_factor: 0.4,
            forehead_margin: 0.02,
            feather_fraction: 0.04,
            min_feather_px: 4,
            min_face_width: 0.10,
            fallback_cutoff: 0.35,
        }
    }
}

/// Single-channel weight raster: 255 regenerable, 0 protected.
#[derive(Debug, Clone, PartialEq)]
pub struct HairMask {
    pixels: GrayImage,
}

impl HairMask {
    pub const MAX: u8 = u8::MAX;

    pub fn from_gray(pixels: GrayImage) -> Self {
        Self { pixels }
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

    pub fn value_at(&self, x: u32, y: u32) -> u8 {
        self.pixels.get_pixel(x, y)[0]
    }

    /// Mask weight in `[0, 1]`.
    pub fn alpha_at(&self, x: u32, y: u32) -> f32 {
        f32::from(self.value_at(x, y)) / f32::from(Self::MAX)
    }

    pub fn gray(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn regenerable_pixel_count(&self) -> usize {
        self.pixels.pixels().filter(|p| p[0] > 0).count()
    }

    pub fn coverage(&self) -> f32 {
        let total = self.pixels.width() as usize * self.pixels.height() as usize;
        if total == 0 {
            return 0.0;
        }
        self.regenerable_pixel_count() as f32 / total as f32
    }
}

#[derive(Debug, Clone, Copy)]
struct FaceSpan {
    left: f32,
    right: f32,
}

#[derive(Debug, Clone, Default)]
pub struct HairMaskSynthesizer {
    geometry: MaskGeometry,
}

impl HairMaskSynthesizer {
    pub fn new(geometry: MaskGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &MaskGeometry {
        &self.geometry
    }

    pub fn synthesize(&self, photo: &Photo, boundary: &FaceBoundary) -> HairMask {
        self.synthesize_for_size(photo.width(), photo.height(), boundary)
    }

    /// Tolerates any boundary values. An empty result is replaced by
    /// [`Self::fallback`].
    pub fn synthesize_for_size(&self, width: u32, height: u32, boundary: &FaceBoundary) -> HairMask {
        let mask = self.face_regions(width, height, boundary);
        if mask.regenerable_pixel_count() == 0 {
            warn!(
                width,
                height,
                ?boundary,
                "hair mask synthesis produced no regenerable pixels; using top-band fallback"
            );
            return self.fallback(width, height);
        }
        mask
    }

    /// Full-width band over the top of the image, feathered at the cutoff.
    pub fn fallback(&self, width: u32, height: u32) -> HairMask {
        let hf = height as f32;
        let cutoff = self.geometry.fallback_cutoff.clamp(0.0, 1.0) * hf;
        let feather = self.feather_px(height);
        let band_top = cutoff - feather / 2.0;
        let row_values = (0..height)
            .map(|y| ramp_down(y as f32 + 0.5, band_top, feather))
            .collect::<Vec<_>>();
        HairMask::from_gray(GrayImage::from_fn(width, height, |_, y| {
            Luma([row_values[y as usize]])
        }))
    }

    fn face_regions(&self, width: u32, height: u32, boundary: &FaceBoundary) -> HairMask {
        let g = &self.geometry;
        let wf = width as f32;
        let hf = height as f32;
        let span = self.face_span(boundary);
        let forehead = sanitize(boundary.forehead_top, FaceBoundary::FALLBACK.forehead_top);
        let eye = sanitize(boundary.eye_level, FaceBoundary::FALLBACK.eye_level).max(forehead);

        let face_left_px = span.left * wf;
        let face_right_px = span.right * wf;
        let face_width_px = face_right_px - face_left_px;
        let center_x = (face_left_px + face_right_px) / 2.0;
        let feather = self.feather_px(height);
        let half_feather = feather / 2.0;

        let hairline = (forehead + g.forehead_margin.max(0.0)) * hf;
        let dome_a = g.top_width_factor.max(0.0) * face_width_px / 2.0;
        let dome_b = hairline.max(1.0) * 1.2;
        let eye_px = eye * hf;
        let side_w = g.side_width_factor.max(0.0) * face_width_px;

        HairMask::from_gray(GrayImage::from_fn(width, height, |x, y| {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;

            let mut value = 0u8;
            if dome_a > 0.0 {
                let dx = (px - center_x) / dome_a;
                let dy = (py - hairline) / dome_b;
                if dx * dx + dy * dy <= 1.0 {
                    value = value.max(ramp_down(py, hairline - half_feather, feather));
                }
            }

            if side_w > 0.0 {
                let edge_distance = if px >= face_left_px - side_w && px < face_left_px {
                    Some(face_left_px - px)
                } else if px > face_right_px && px <= face_right_px + side_w {
                    Some(px - face_right_px)
                } else {
                    None
                };
                if let Some(distance) = edge_distance {
                    let vertical = ramp_down(py, eye_px - half_feather, feather);
                    let horizontal = ramp_up(distance, half_feather);
                    value = value.max(vertical.min(horizontal));
                }
            }

            Luma([value])
        }))
    }

    fn face_span(&self, boundary: &FaceBoundary) -> FaceSpan {
        let a = sanitize(boundary.face_left, FaceBoundary::FALLBACK.face_left);
        let b = sanitize(boundary.face_right, FaceBoundary::FALLBACK.face_right);
        let (mut left, mut right) = if a <= b { (a, b) } else { (b, a) };
        let min_width = self.geometry.min_face_width.clamp(0.01, 1.0);
        if right - left < min_width {
            let center = (left + right) / 2.0;
            left = center - min_width / 2.0;
            right = center + min_width / 2.0;
            if left < 0.0 {
                right -= left;
                left = 0.0;
            }
            if right > 1.0 {
                left -= right - 1.0;
                right = 1.0;
            }
        }
        FaceSpan { left, right }
    }

    fn feather_px(&self, height: u32) -> f32 {
        (self.geometry.feather_fraction.max(0.0) * height as f32)
            .max(self.geometry.min_feather_px as f32)
            .max(1.0)
    }
}

fn sanitize(value: f32, default: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        default
    }
}

/// 255 above `band_start`, 0 below `band_start + band`, linear between.
fn ramp_down(position: f32, band_start: f32, band: f32) -> u8 {
    if position <= band_start {
        return HairMask::MAX;
    }
    let t = 1.0 - (position - band_start) / band;
    to_mask_value(t)
}

/// 0 at distance 0, 255 from `band` onwards.
fn ramp_up(distance: f32, band: f32) -> u8 {
    if band <= 0.0 {
        return HairMask::MAX;
    }
    to_mask_value(distance / band)
}

fn to_mask_value(t: f32) -> u8 {
    (t.clamp(0.0, 1.0) * f32::from(HairMask::MAX)).round() as u8
}
