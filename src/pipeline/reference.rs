use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::pipeline::boundary::{BoundarySource, FaceBoundary, FaceBoundaryEstimator};
use crate::pipeline::compositor::BlendThresholds;
use crate::pipeline::error::{run_blocking, TransformError};
use crate::pipeline::mask::{HairMask, HairMaskSynthesizer};
use crate::pipeline::photo::{Photo, PhotoError};

#[derive(Debug, Clone)]
pub struct ReferenceHair {
    /// Reference photo with alpha zeroed outside the hair region.
    pub sprite: Photo,
    pub boundary: FaceBoundary,
    pub boundary_source: BoundarySource,
}

/// Cuts an alpha-transparent hair sprite out of a reference style photo.
#[derive(Clone)]
pub struct ReferenceHairExtractor {
    estimator: FaceBoundaryEstimator,
    synthesizer: HairMaskSynthesizer,
    thresholds: BlendThresholds,
}

impl ReferenceHairExtractor {
    pub fn new(
        estimator: FaceBoundaryEstimator,
        synthesizer: HairMaskSynthesizer,
        thresholds: BlendThresholds,
    ) -> Self {
        Self {
            estimator,
            synthesizer,
            thresholds,
        }
    }

    pub async fn extract(&self, reference: &Photo) -> Result<ReferenceHair, TransformError> {
        let estimate = self.estimator.estimate_detailed(reference).await;
        let (sprite, coverage) = {
            let synthesizer = self.synthesizer.clone();
            let thresholds = self.thresholds;
            let reference = reference.clone();
            let boundary = estimate.boundary;
            run_blocking("reference sprite", move || {
                let mask = synthesizer.synthesize(&reference, &boundary);
                cut_sprite(&reference, &mask, &thresholds).map(|sprite| (sprite, mask.coverage()))
            })
            .await??
        };
        debug!(
            coverage,
            boundary_source = estimate.source.as_str(),
            "reference hair sprite extracted"
        );
        Ok(ReferenceHair {
            sprite,
            boundary: estimate.boundary,
            boundary_source: estimate.source,
        })
    }
}

pub fn cut_sprite(
    reference: &Photo,
    mask: &HairMask,
    thresholds: &BlendThresholds,
) -> Result<Photo, PhotoError> {
    let cutoff = thresholds.protected_max_value();
    let src = reference.rgba();
    let sprite = RgbaImage::from_fn(reference.width(), reference.height(), |x, y| {
        let p = src.get_pixel(x, y);
        let weight = if x < mask.width() && y < mask.height() {
            mask.value_at(x, y)
        } else {
            0
        };
        if weight <= cutoff {
            return Rgba([p[0], p[1], p[2], 0]);
        }
        let alpha = (u16::from(p[3]) * u16::from(weight) + 127) / 255;
        Rgba([p[0], p[1], p[2], alpha as u8])
    });
    Photo::from_rgba(sprite)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use image::{GrayImage, Luma};
    use serde_json::json;

    use super::*;
    use crate::pipeline::backends::transport::fake::ScriptedTransport;
    use crate::pipeline::settings_layer::VisionSettings;

    #[test]
    fn sprite_alpha_follows_mask() {
        let reference = Photo::from_rgba(RgbaImage::from_pixel(3, 1, Rgba([40, 50, 60, 255])))
            .expect("photo should build");
        let mask = HairMask::from_gray(GrayImage::from_fn(3, 1, |x, _| {
            Luma([[255u8, 128, 30][x as usize]])
        }));

        let sprite = cut_sprite(&reference, &mask, &BlendThresholds::default())
            .expect("sprite should build");

        assert_eq!(sprite.rgba().get_pixel(0, 0), &Rgba([40, 50, 60, 255]));
        assert_eq!(sprite.rgba().get_pixel(1, 0), &Rgba([40, 50, 60, 128]));
        assert_eq!(sprite.rgba().get_pixel(2, 0)[3], 0);
    }

    #[tokio::test]
    async fn extracts_with_service_boundary() {
        let transport = Arc::new(ScriptedTransport::new().respond_json(
            ":generateContent",
            200,
            json!({ "candidates": [{ "content": { "parts": [{
                "text": "{\"foreheadTop\":0.3,\"eyeLevel\":0.4,\"faceLeft\":0.35,\"faceRight\":0.65,\"chinBottom\":0.8}"
            }] } }] }),
        ));
        let extractor = ReferenceHairExtractor::new(
            FaceBoundaryEstimator::new(
                transport,
                VisionSettings::default(),
                Some(String::from("k")),
            ),
            HairMaskSynthesizer::default(),
            BlendThresholds::default(),
        );
        let reference = Photo::from_rgba(RgbaImage::from_pixel(100, 100, Rgba([1, 2, 3, 255])))
            .expect("photo should build");

        let hair = extractor.extract(&reference).await.expect("extract should succeed");

        assert_eq!(hair.boundary_source, BoundarySource::Service);
        assert_eq!(hair.sprite.dimensions(), (100, 100));
        assert_eq!(hair.sprite.rgba().get_pixel(50, 5)[3], 255);
        assert_eq!(hair.sprite.rgba().get_pixel(50, 90)[3], 0);
    }

    #[tokio::test]
    async fn large_reference_leaves_the_executor_responsive() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(1));
                loop {
                    interval.tick().await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        let extractor = ReferenceHairExtractor::new(
            FaceBoundaryEstimator::new(
                Arc::new(ScriptedTransport::new()),
                VisionSettings::default(),
                Some(String::from("k")),
            ),
            HairMaskSynthesizer::default(),
            BlendThresholds::default(),
        );
        let reference = Photo::from_rgba(RgbaImage::from_pixel(2000, 2000, Rgba([1, 2, 3, 255])))
            .expect("photo should build");

        let hair = extractor.extract(&reference).await.expect("extract should succeed");
        ticker.abort();

        assert_eq!(hair.sprite.dimensions(), (2000, 2000));
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn unreachable_service_still_yields_top_sprite() {
        let extractor = ReferenceHairExtractor::new(
            FaceBoundaryEstimator::new(
                Arc::new(ScriptedTransport::new()),
                VisionSettings::default(),
                Some(String::from("k")),
            ),
            HairMaskSynthesizer::default(),
            BlendThresholds::default(),
        );
        let reference = Photo::from_rgba(RgbaImage::from_pixel(100, 100, Rgba([1, 2, 3, 255])))
            .expect("photo should build");

        let hair = extractor.extract(&reference).await.expect("extract should succeed");

        assert_eq!(hair.boundary_source, BoundarySource::Fallback);
        assert_eq!(hair.sprite.rgba().get_pixel(50, 5)[3], 255);
        assert_eq!(hair.sprite.rgba().get_pixel(50, 95)[3], 0);
    }
}
