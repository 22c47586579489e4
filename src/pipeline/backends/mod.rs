pub mod gemini;
pub mod openai;
pub mod transport;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::pipeline::error::{ErrorKind, TransformError};
use crate::pipeline::mask::HairMask;
use crate::pipeline::photo::Photo;
use crate::pipeline::settings_layer::{PipelineSettings, ProviderSecrets};

use self::gemini::GeminiImageBackend;
use self::openai::OpenAiImageBackend;
use self::transport::{SharedHttpTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMode {
    DirectEdit,
    MaskInpaint,
    ReferenceGuided,
}

impl BackendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectEdit => "direct_edit",
            Self::MaskInpaint => "mask_inpaint",
            Self::ReferenceGuided => "reference_guided",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    #[serde(alias = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }
}

/// Everything one generation attempt sends to a provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub source: Photo,
    pub mask: Option<HairMask>,
    pub reference: Option<Photo>,
    pub instructions: String,
    pub mode: BackendMode,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{provider} {kind}: {message}")]
pub struct GenerationError {
    pub provider: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(provider: ProviderKind, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.as_str(),
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn transport(provider: ProviderKind, error: TransportError) -> Self {
        let kind = match error {
            TransportError::TooLarge { .. } => ErrorKind::NoImageReturned,
            _ => ErrorKind::NetworkError,
        };
        Self::new(provider, kind, error.to_string())
    }
}

impl From<GenerationError> for TransformError {
    fn from(error: GenerationError) -> Self {
        TransformError::new(error.kind, error.to_string())
    }
}

pub type GenerationResult = Result<Photo, GenerationError>;

/// One variant per provider; each variant knows which modes it can serve.
#[derive(Clone)]
pub enum GenerativeBackend {
    Gemini(GeminiImageBackend),
    OpenAi(OpenAiImageBackend),
}

impl GenerativeBackend {
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Gemini(_) => ProviderKind::Gemini,
            Self::OpenAi(_) => ProviderKind::OpenAi,
        }
    }

    pub fn supports(&self, mode: BackendMode) -> bool {
        match self {
            Self::Gemini(_) => GeminiImageBackend::supports(mode),
            Self::OpenAi(_) => OpenAiImageBackend::supports(mode),
        }
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        validate_request_shape(self.provider(), request)?;
        let result = match self {
            Self::Gemini(backend) => backend.generate(request).await,
            Self::OpenAi(backend) => backend.generate(request).await,
        };
        if let Err(error) = &result {
            warn!(
                provider = error.provider,
                mode = request.mode.as_str(),
                kind = error.kind.as_str(),
                message = %error.message,
                "generation failed"
            );
        }
        result
    }
}

fn validate_request_shape(provider: ProviderKind, request: &GenerationRequest) -> Result<(), GenerationError> {
    match request.mode {
        BackendMode::MaskInpaint if request.mask.is_none() => Err(GenerationError::new(
            provider,
            ErrorKind::InvalidInput,
            "mask-inpaint generation requires a hair mask",
        )),
        BackendMode::ReferenceGuided if request.reference.is_none() => Err(GenerationError::new(
            provider,
            ErrorKind::InvalidInput,
            "reference-guided generation requires a reference photo",
        )),
        _ => Ok(()),
    }
}

/// Maps each mode to the provider configured for it.
#[derive(Clone)]
pub struct BackendRouter {
    gemini: GeminiImageBackend,
    openai: OpenAiImageBackend,
    direct_edit: ProviderKind,
    mask_inpaint: ProviderKind,
    reference_guided: ProviderKind,
}

impl BackendRouter {
    pub fn from_settings(
        transport: SharedHttpTransport,
        settings: &PipelineSettings,
        secrets: &ProviderSecrets,
    ) -> Self {
        Self {
            gemini: GeminiImageBackend::new(
                transport.clone(),
                settings.gemini.clone(),
                secrets.gemini_api_key.clone(),
            ),
            openai: OpenAiImageBackend::new(
                transport,
                settings.openai.clone(),
                secrets.openai_api_key.clone(),
            ),
            direct_edit: settings.routing.direct_edit,
            mask_inpaint: settings.routing.mask_inpaint,
            reference_guided: settings.routing.reference_guided,
        }
    }

    pub fn provider_for(&self, mode: BackendMode) -> ProviderKind {
        match mode {
            BackendMode::DirectEdit => self.direct_edit,
            BackendMode::MaskInpaint => self.mask_inpaint,
            BackendMode::ReferenceGuided => self.reference_guided,
        }
    }

    pub fn backend_for(&self, mode: BackendMode) -> Result<GenerativeBackend, GenerationError> {
        let backend = match self.provider_for(mode) {
            ProviderKind::Gemini => GenerativeBackend::Gemini(self.gemini.clone()),
            ProviderKind::OpenAi => GenerativeBackend::OpenAi(self.openai.clone()),
        };
        if !backend.supports(mode) {
            return Err(GenerationError::new(
                backend.provider(),
                ErrorKind::InvalidInput,
                format!(
                    "provider {} has no {} endpoint",
                    backend.provider().as_str(),
                    mode.as_str()
                ),
            ));
        }
        let configured = match &backend {
            GenerativeBackend::Gemini(b) => b.has_credentials(),
            GenerativeBackend::OpenAi(b) => b.has_credentials(),
        };
        if !configured {
            return Err(GenerationError::new(
                backend.provider(),
                ErrorKind::AuthError,
                format!("no API key configured for {}", backend.provider().as_str()),
            ));
        }
        Ok(backend)
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        self.backend_for(request.mode)?.generate(request).await
    }
}

/// Shared HTTP failure classification; provider codes and messages refine
/// the status.
pub(crate) fn classify_http_failure(status: u16, code: Option<&str>, message: &str) -> ErrorKind {
    let code = code.unwrap_or_default().to_ascii_lowercase();
    let message = message.to_ascii_lowercase();
    let safety_code = matches!(
        code.as_str(),
        "content_policy_violation" | "moderation_blocked" | "safety" | "image_safety"
    );
    let rate_code = matches!(
        code.as_str(),
        "resource_exhausted" | "rate_limit_exceeded" | "insufficient_quota"
    );
    if status == 429 || rate_code {
        return ErrorKind::RateLimited;
    }
    if safety_code || (status == 400 && (message.contains("safety") || message.contains("content policy"))) {
        return ErrorKind::SafetyBlocked;
    }
    match status {
        401 | 403 => ErrorKind::AuthError,
        408 | 504 => ErrorKind::NetworkError,
        400..=499 => ErrorKind::InvalidInput,
        500..=599 => ErrorKind::NetworkError,
        _ => ErrorKind::Unknown,
    }
}

pub(crate) fn decode_inline_image(provider: ProviderKind, b64: &str) -> GenerationResult {
    let bytes = BASE64_STANDARD
        .decode(b64.trim().as_bytes())
        .map_err(|e| {
            GenerationError::new(
                provider,
                ErrorKind::NoImageReturned,
                format!("image base64 decode failed: {e}"),
            )
        })?;
    decode_image_bytes(provider, bytes.as_slice())
}

pub(crate) fn decode_image_bytes(provider: ProviderKind, bytes: &[u8]) -> GenerationResult {
    Photo::decode(bytes).map_err(|e| {
        GenerationError::new(
            provider,
            ErrorKind::NoImageReturned,
            format!("provider image could not be decoded: {e}"),
        )
    })
}

pub(crate) async fn fetch_remote_image(
    provider: ProviderKind,
    transport: &SharedHttpTransport,
    pointer: &str,
    headers: Vec<(String, String)>,
) -> GenerationResult {
    let url = Url::parse(pointer).map_err(|e| {
        GenerationError::new(
            provider,
            ErrorKind::NoImageReturned,
            format!("image pointer is not a URL ({pointer}): {e}"),
        )
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GenerationError::new(
            provider,
            ErrorKind::NoImageReturned,
            format!("unsupported image pointer scheme '{}'", url.scheme()),
        ));
    }
    let response = transport
        .fetch(url.to_string(), headers)
        .await
        .map_err(|e| GenerationError::transport(provider, e))?;
    if !response.is_success() {
        return Err(GenerationError::new(
            provider,
            classify_http_failure(response.status, None, ""),
            format!("image download failed with HTTP {}", response.status),
        ));
    }
    decode_image_bytes(provider, response.body.as_slice())
}
