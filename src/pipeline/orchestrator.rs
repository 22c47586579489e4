use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::backends::transport::{ReqwestTransport, SharedHttpTransport};
use crate::pipeline::backends::{BackendMode, BackendRouter, GenerationRequest};
use crate::pipeline::boundary::{BoundarySource, FaceBoundary, FaceBoundaryEstimator};
use crate::pipeline::compositor::IdentityCompositor;
use crate::pipeline::error::{run_blocking, ErrorKind, TransformError};
use crate::pipeline::mask::HairMaskSynthesizer;
use crate::pipeline::photo::Photo;
use crate::pipeline::reference::{ReferenceHair, ReferenceHairExtractor};
use crate::pipeline::settings_layer::PipelineConfig;
use crate::pipeline::style::{build_instructions, StyleDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformStrategy {
    /// Regenerate only the masked hair region.
    Inpaint,
    /// Let the provider edit the whole photo, then restore the face.
    DirectEdit,
    /// Provider edit guided by a reference hairstyle photo.
    ReferenceGuided,
    /// Paste the reference photo's hair without any generative call.
    Overlay,
}

impl TransformStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inpaint => "inpaint",
            Self::DirectEdit => "direct_edit",
            Self::ReferenceGuided => "reference_guided",
            Self::Overlay => "overlay",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "inpaint" | "mask_inpaint" => Some(Self::Inpaint),
            "direct_edit" | "direct" => Some(Self::DirectEdit),
            "reference_guided" | "reference" => Some(Self::ReferenceGuided),
            "overlay" => Some(Self::Overlay),
            _ => None,
        }
    }

    pub fn needs_reference(self) -> bool {
        matches!(self, Self::ReferenceGuided | Self::Overlay)
    }

    pub fn backend_mode(self) -> Option<BackendMode> {
        match self {
            Self::Inpaint => Some(BackendMode::MaskInpaint),
            Self::DirectEdit => Some(BackendMode::DirectEdit),
            Self::ReferenceGuided => Some(BackendMode::ReferenceGuided),
            Self::Overlay => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    DetectingBoundary,
    SynthesizingMask,
    Generating,
    Compositing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DetectingBoundary => "detecting_boundary",
            Self::SynthesizingMask => "synthesizing_mask",
            Self::Generating => "generating",
            Self::Compositing => "compositing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use PipelineState::{
            Compositing, DetectingBoundary, Done, Failed, Generating, Idle, SynthesizingMask,
        };

        matches!(
            (self, next),
            (Idle, DetectingBoundary)
                | (DetectingBoundary, SynthesizingMask)
                | (SynthesizingMask, Generating)
                | (SynthesizingMask, Compositing)
                | (Generating, Compositing)
                | (Compositing, Done)
                | (Idle, Failed)
                | (DetectingBoundary, Failed)
                | (SynthesizingMask, Failed)
                | (Generating, Failed)
                | (Compositing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub request_id: String,
    pub photo: Photo,
    pub strategy: TransformStrategy,
    pub boundary: FaceBoundary,
    pub boundary_source: BoundarySource,
    /// Every state the run passed through, starting at `Idle`.
    pub transitions: Vec<PipelineState>,
}

struct StateTracker {
    request_id: String,
    state: PipelineState,
    transitions: Vec<PipelineState>,
}

impl StateTracker {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
        }
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), TransformError> {
        if !self.state.can_transition_to(next) {
            return Err(TransformError::new(
                ErrorKind::Unknown,
                format!(
                    "illegal pipeline transition {} -> {}",
                    self.state.as_str(),
                    next.as_str()
                ),
            ));
        }
        info!(
            request_id = %self.request_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "pipeline state changed"
        );
        self.state = next;
        self.transitions.push(next);
        Ok(())
    }

    fn fail(&mut self, error: &TransformError) {
        warn!(
            request_id = %self.request_id,
            state = self.state.as_str(),
            kind = error.kind.as_str(),
            message = %error.message,
            "hair transformation failed"
        );
        if self.state.can_transition_to(PipelineState::Failed) {
            self.state = PipelineState::Failed;
            self.transitions.push(PipelineState::Failed);
        }
    }
}

/// End-to-end hair transformation. Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct HairPipeline {
    estimator: FaceBoundaryEstimator,
    synthesizer: HairMaskSynthesizer,
    extractor: ReferenceHairExtractor,
    router: BackendRouter,
    compositor: IdentityCompositor,
    default_strategy: TransformStrategy,
    reference_strategy: TransformStrategy,
}

impl HairPipeline {
    pub fn from_config(transport: SharedHttpTransport, config: &PipelineConfig) -> Self {
        let settings = &config.settings;
        let estimator = FaceBoundaryEstimator::new(
            transport.clone(),
            settings.vision.clone(),
            config.secrets.vision_api_key.clone(),
        );
        let synthesizer = HairMaskSynthesizer::new(settings.mask);
        Self {
            extractor: ReferenceHairExtractor::new(
                estimator.clone(),
                synthesizer.clone(),
                settings.compositor,
            ),
            estimator,
            synthesizer,
            router: BackendRouter::from_settings(transport, settings, &config.secrets),
            compositor: IdentityCompositor::new(settings.compositor),
            default_strategy: settings.routing.default_strategy,
            reference_strategy: settings.routing.reference_strategy,
        }
    }

    /// Builds the pipeline over a real `reqwest` client.
    pub fn connect(config: &PipelineConfig) -> Result<Self, TransformError> {
        let timeout = Duration::from_secs(config.settings.http.timeout_secs.max(1));
        let transport = ReqwestTransport::new(timeout)
            .map_err(|e| TransformError::new(ErrorKind::NetworkError, e.to_string()))?;
        Ok(Self::from_config(std::sync::Arc::new(transport), config))
    }

    pub fn select_strategy(&self, style: &StyleDescriptor) -> Result<TransformStrategy, TransformError> {
        let strategy = style.strategy.unwrap_or(if style.reference.is_some() {
            self.reference_strategy
        } else {
            self.default_strategy
        });
        if strategy.needs_reference() && style.reference.is_none() {
            return Err(TransformError::invalid_input(format!(
                "strategy {} requires a reference photo",
                strategy.as_str()
            )));
        }
        Ok(strategy)
    }

    pub async fn transform_hair(
        &self,
        photo: &Photo,
        style: &StyleDescriptor,
    ) -> Result<CompositeResult, TransformError> {
        let mut tracker = StateTracker::new(Uuid::new_v4().to_string());
        match self.run(&mut tracker, photo, style).await {
            Ok(result) => Ok(result),
            Err(error) => {
                tracker.fail(&error);
                Err(error)
            }
        }
    }

    /// Like [`Self::transform_hair`], but gives up with `Cancelled` as soon
    /// as `cancelled` resolves. In-flight provider calls are dropped.
    pub async fn transform_hair_until<C>(
        &self,
        photo: &Photo,
        style: &StyleDescriptor,
        cancelled: C,
    ) -> Result<CompositeResult, TransformError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancelled => {
                warn!("hair transformation cancelled by caller");
                Err(TransformError::cancelled())
            }
            result = self.transform_hair(photo, style) => result,
        }
    }

    async fn run(
        &self,
        tracker: &mut StateTracker,
        photo: &Photo,
        style: &StyleDescriptor,
    ) -> Result<CompositeResult, TransformError> {
        let strategy = self.select_strategy(style)?;
        let instructions = match strategy.backend_mode() {
            Some(mode) => Some((mode, build_instructions(style, mode)?)),
            None => None,
        };
        info!(
            request_id = %tracker.request_id,
            strategy = strategy.as_str(),
            width = photo.width(),
            height = photo.height(),
            "hair transformation started"
        );

        tracker.advance(PipelineState::DetectingBoundary)?;
        let overlay_reference = match strategy {
            TransformStrategy::Overlay => style.reference.as_ref(),
            _ => None,
        };
        let (estimate, reference_hair) = tokio::join!(
            self.estimator.estimate_detailed(photo),
            self.extract_reference(overlay_reference)
        );
        let reference_hair = reference_hair?;

        tracker.advance(PipelineState::SynthesizingMask)?;
        let mask = {
            let synthesizer = self.synthesizer.clone();
            let source = photo.clone();
            let boundary = estimate.boundary;
            run_blocking("mask synthesis", move || synthesizer.synthesize(&source, &boundary)).await?
        };

        let candidate = match (instructions, reference_hair) {
            (Some((mode, instructions)), _) => {
                tracker.advance(PipelineState::Generating)?;
                let request = GenerationRequest {
                    source: photo.clone(),
                    mask: (mode == BackendMode::MaskInpaint).then(|| mask.clone()),
                    reference: match mode {
                        BackendMode::ReferenceGuided => style.reference.clone(),
                        _ => None,
                    },
                    instructions,
                    mode,
                };
                self.router.generate(&request).await?
            }
            (None, Some(hair)) => {
                let compositor = self.compositor.clone();
                let source = photo.clone();
                let boundary = estimate.boundary;
                run_blocking("overlay", move || {
                    compositor.compose_overlay(&source, &hair.sprite, &boundary, &hair.boundary)
                })
                .await??
            }
            (None, None) => {
                return Err(TransformError::invalid_input(
                    "overlay strategy requires a reference photo",
                ))
            }
        };

        tracker.advance(PipelineState::Compositing)?;
        let composed = {
            let compositor = self.compositor.clone();
            let source = photo.clone();
            run_blocking("compositing", move || compositor.composite(&source, &candidate, &mask))
                .await??
        };

        tracker.advance(PipelineState::Done)?;
        Ok(CompositeResult {
            request_id: tracker.request_id.clone(),
            photo: composed,
            strategy,
            boundary: estimate.boundary,
            boundary_source: estimate.source,
            transitions: tracker.transitions.clone(),
        })
    }

    async fn extract_reference(
        &self,
        reference: Option<&Photo>,
    ) -> Result<Option<ReferenceHair>, TransformError> {
        match reference {
            Some(reference) => Ok(Some(self.extractor.extract(reference).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine;
    use image::{Rgba, RgbaImage};
    use serde_json::{json, Value};

    use super::*;
    use crate::pipeline::backends::transport::fake::ScriptedTransport;
    use crate::pipeline::backends::transport::{
        HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFuture,
    };
    use crate::pipeline::settings_layer::{PipelineSettings, ProviderSecrets};

    const VISION_ROUTE: &str = "gemini-2.0-flash:generateContent";
    const GEMINI_IMAGE_ROUTE: &str = "gemini-2.5-flash-image:generateContent";
    const OPENAI_ROUTE: &str = "/images/edits";

    fn solid(width: u32, height: u32, color: [u8; 4]) -> Photo {
        Photo::from_rgba(RgbaImage::from_pixel(width, height, Rgba(color))).expect("photo should build")
    }

    fn config(settings: PipelineSettings) -> PipelineConfig {
        PipelineConfig {
            settings,
            secrets: ProviderSecrets {
                vision_api_key: Some(String::from("vision-key")),
                gemini_api_key: Some(String::from("gemini-key")),
                openai_api_key: Some(String::from("openai-key")),
            },
        }
    }

    fn pipeline(transport: Arc<ScriptedTransport>) -> HairPipeline {
        HairPipeline::from_config(transport, &config(PipelineSettings::default()))
    }

    fn vision_body() -> Value {
        json!({ "candidates": [{ "content": { "parts": [{
            "text": "{\"foreheadTop\":0.3,\"eyeLevel\":0.4,\"faceLeft\":0.35,\"faceRight\":0.65,\"chinBottom\":0.8}"
        }] } }] })
    }

    fn openai_body(candidate: &Photo) -> Value {
        let png = candidate.encode_png().expect("png");
        json!({ "data": [{ "b64_json": BASE64_STANDARD.encode(png) }] })
    }

    /// Vision calls answer only once `vision_parties` of them are pending at
    /// the same time; generation calls park forever.
    struct GatedTransport {
        vision_gate: tokio::sync::Barrier,
        generation_started: tokio::sync::Notify,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl GatedTransport {
        fn new(vision_parties: usize) -> Arc<Self> {
            Arc::new(Self {
                vision_gate: tokio::sync::Barrier::new(vision_parties),
                generation_started: tokio::sync::Notify::new(),
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("seen mutex poisoned").clone()
        }
    }

    impl HttpTransport for GatedTransport {
        fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
            Box::pin(async move {
                self.seen
                    .lock()
                    .expect("seen mutex poisoned")
                    .push(request.url.clone());
                if request.url.contains(VISION_ROUTE) {
                    self.vision_gate.wait().await;
                    return Ok(HttpResponse {
                        status: 200,
                        body: vision_body().to_string().into_bytes(),
                    });
                }
                self.generation_started.notify_one();
                std::future::pending::<Result<HttpResponse, TransportError>>().await
            })
        }

        fn fetch(&self, url: String, _headers: Vec<(String, String)>) -> TransportFuture<'_> {
            Box::pin(async move { Err(TransportError::Request(url)) })
        }
    }

    #[test]
    fn state_graph_allows_overlay_skip_and_failure_from_any_active_state() {
        use PipelineState::*;

        assert!(Idle.can_transition_to(DetectingBoundary));
        assert!(SynthesizingMask.can_transition_to(Generating));
        assert!(SynthesizingMask.can_transition_to(Compositing));
        assert!(Compositing.can_transition_to(Done));
        assert!(Generating.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Generating));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Idle));
        assert!(Done.is_terminal());
    }

    #[test]
    fn strategy_selection_prefers_explicit_then_reference_then_default() {
        let transport = Arc::new(ScriptedTransport::new());
        let default_pipeline = pipeline(transport.clone());
        let reference = solid(4, 4, [0, 0, 0, 255]);

        assert_eq!(
            default_pipeline.select_strategy(&StyleDescriptor::described("bob")),
            Ok(TransformStrategy::Inpaint)
        );
        assert_eq!(
            default_pipeline
                .select_strategy(&StyleDescriptor::described("bob").with_reference(reference.clone())),
            Ok(TransformStrategy::ReferenceGuided)
        );
        let explicit = StyleDescriptor {
            strategy: Some(TransformStrategy::DirectEdit),
            ..StyleDescriptor::described("bob").with_reference(reference.clone())
        };
        assert_eq!(
            default_pipeline.select_strategy(&explicit),
            Ok(TransformStrategy::DirectEdit)
        );

        let mut settings = PipelineSettings::default();
        settings.routing.reference_strategy = TransformStrategy::Overlay;
        let overlay_pipeline = HairPipeline::from_config(transport, &config(settings));
        assert_eq!(
            overlay_pipeline.select_strategy(&StyleDescriptor::described("").with_reference(reference)),
            Ok(TransformStrategy::Overlay)
        );
    }

    #[test]
    fn parses_strategy_aliases() {
        assert_eq!(TransformStrategy::parse("mask-inpaint"), Some(TransformStrategy::Inpaint));
        assert_eq!(TransformStrategy::parse("Reference"), Some(TransformStrategy::ReferenceGuided));
        assert_eq!(TransformStrategy::parse("paint"), None);
    }

    #[tokio::test]
    async fn inpaint_keeps_face_and_takes_generated_hair() {
        let original = solid(100, 100, [90, 90, 90, 255]);
        let candidate = solid(100, 100, [200, 30, 30, 255]);
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond_json(VISION_ROUTE, 200, vision_body())
                .respond_json(OPENAI_ROUTE, 200, openai_body(&candidate)),
        );

        let result = pipeline(transport.clone())
            .transform_hair(&original, &StyleDescriptor::described("a copper pixie cut"))
            .await
            .expect("transform should succeed");

        assert_eq!(result.strategy, TransformStrategy::Inpaint);
        assert_eq!(result.boundary_source, BoundarySource::Service);
        assert_eq!(result.photo.dimensions(), (100, 100));
        assert_eq!(result.photo.rgba().get_pixel(50, 5), &Rgba([200, 30, 30, 255]));
        assert_eq!(result.photo.rgba().get_pixel(50, 90), &Rgba([90, 90, 90, 255]));
        assert_eq!(
            result.transitions,
            vec![
                PipelineState::Idle,
                PipelineState::DetectingBoundary,
                PipelineState::SynthesizingMask,
                PipelineState::Generating,
                PipelineState::Compositing,
                PipelineState::Done,
            ]
        );
        let seen = transport.take_seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].url.ends_with(OPENAI_ROUTE));
    }

    #[tokio::test]
    async fn smaller_candidate_still_yields_original_dimensions() {
        let original = solid(100, 100, [90, 90, 90, 255]);
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond_json(VISION_ROUTE, 200, vision_body())
                .respond_json(OPENAI_ROUTE, 200, openai_body(&solid(50, 50, [1, 2, 3, 255]))),
        );

        let result = pipeline(transport)
            .transform_hair(&original, &StyleDescriptor::described("buzz cut"))
            .await
            .expect("transform should succeed");

        assert_eq!(result.photo.dimensions(), (100, 100));
    }

    #[tokio::test]
    async fn vision_outage_falls_back_and_still_composites() {
        let original = solid(100, 100, [90, 90, 90, 255]);
        let transport = Arc::new(ScriptedTransport::new().respond_json(
            OPENAI_ROUTE,
            200,
            openai_body(&solid(100, 100, [10, 10, 10, 255])),
        ));

        let result = pipeline(transport)
            .transform_hair(&original, &StyleDescriptor::described("long waves"))
            .await
            .expect("fallback boundary should keep the pipeline going");

        assert_eq!(result.boundary_source, BoundarySource::Fallback);
        assert_eq!(result.boundary, FaceBoundary::FALLBACK);
        assert_eq!(result.photo.rgba().get_pixel(50, 99), &Rgba([90, 90, 90, 255]));
    }

    #[tokio::test]
    async fn provider_without_image_is_never_substituted() {
        let original = solid(64, 64, [90, 90, 90, 255]);
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond_json(VISION_ROUTE, 200, vision_body())
                .respond_json(OPENAI_ROUTE, 200, json!({ "data": [] })),
        );

        let err = pipeline(transport)
            .transform_hair(&original, &StyleDescriptor::described("mohawk"))
            .await
            .expect_err("no image must fail");

        assert_eq!(err.kind, ErrorKind::NoImageReturned);
    }

    #[tokio::test]
    async fn safety_block_surfaces_from_direct_edit() {
        let original = solid(64, 64, [90, 90, 90, 255]);
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond_json(VISION_ROUTE, 200, vision_body())
                .respond_json(
                    GEMINI_IMAGE_ROUTE,
                    200,
                    json!({ "candidates": [{ "finishReason": "SAFETY" }] }),
                ),
        );
        let style = StyleDescriptor {
            strategy: Some(TransformStrategy::DirectEdit),
            ..StyleDescriptor::described("bleached undercut")
        };

        let err = pipeline(transport)
            .transform_hair(&original, &style)
            .await
            .expect_err("safety block");

        assert_eq!(err.kind, ErrorKind::SafetyBlocked);
    }

    #[tokio::test]
    async fn overlay_skips_generation() {
        let original = solid(100, 100, [90, 90, 90, 255]);
        let reference = solid(100, 100, [250, 200, 0, 255]);
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond_json(VISION_ROUTE, 200, vision_body())
                .respond_json(VISION_ROUTE, 200, vision_body()),
        );
        let style = StyleDescriptor {
            strategy: Some(TransformStrategy::Overlay),
            ..StyleDescriptor::described("").with_reference(reference)
        };

        let result = pipeline(transport.clone())
            .transform_hair(&original, &style)
            .await
            .expect("overlay should succeed");

        assert_eq!(result.strategy, TransformStrategy::Overlay);
        assert!(!result.transitions.contains(&PipelineState::Generating));
        assert_eq!(result.photo.rgba().get_pixel(50, 5), &Rgba([250, 200, 0, 255]));
        assert_eq!(result.photo.rgba().get_pixel(50, 90), &Rgba([90, 90, 90, 255]));
        let seen = transport.take_seen();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|r| r.url.contains(VISION_ROUTE)));
    }

    #[tokio::test]
    async fn reference_strategy_without_reference_is_invalid() {
        let transport = Arc::new(ScriptedTransport::new());
        let style = StyleDescriptor {
            strategy: Some(TransformStrategy::ReferenceGuided),
            ..StyleDescriptor::described("like the photo")
        };

        let err = pipeline(transport.clone())
            .transform_hair(&solid(8, 8, [0, 0, 0, 255]), &style)
            .await
            .expect_err("reference required");

        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(transport.take_seen().is_empty());
    }

    #[tokio::test]
    async fn photo_and_reference_boundaries_are_estimated_together() {
        let transport = GatedTransport::new(2);
        let pipeline = HairPipeline::from_config(transport.clone(), &config(PipelineSettings::default()));
        let style = StyleDescriptor {
            strategy: Some(TransformStrategy::Overlay),
            ..StyleDescriptor::described("").with_reference(solid(100, 100, [250, 200, 0, 255]))
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.transform_hair(&solid(100, 100, [90, 90, 90, 255]), &style),
        )
        .await
        .expect("both vision calls must be in flight at once")
        .expect("overlay should succeed");

        assert_eq!(result.boundary_source, BoundarySource::Service);
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn cancelling_during_generation_abandons_the_call() {
        let transport = GatedTransport::new(1);
        let pipeline = HairPipeline::from_config(transport.clone(), &config(PipelineSettings::default()));
        let started = transport.clone();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.transform_hair_until(
                &solid(32, 32, [0, 0, 0, 255]),
                &StyleDescriptor::described("bob"),
                async move { started.generation_started.notified().await },
            ),
        )
        .await
        .expect("cancellation must not wait for the parked provider");

        let err = outcome.expect_err("a cancelled run yields no result");
        assert_eq!(err.kind, ErrorKind::Cancelled);
        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains(VISION_ROUTE));
        assert!(seen[1].ends_with(OPENAI_ROUTE));
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_work() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond_json(VISION_ROUTE, 200, vision_body())
                .respond_json(OPENAI_ROUTE, 200, openai_body(&solid(16, 16, [1, 1, 1, 255]))),
        );

        let err = pipeline(transport)
            .transform_hair_until(
                &solid(16, 16, [0, 0, 0, 255]),
                &StyleDescriptor::described("bob"),
                std::future::ready(()),
            )
            .await
            .expect_err("cancelled");

        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
