use image::{Rgba, RgbaImage};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::transport::{HttpRequest, MultipartField, SharedHttpTransport};
use super::{
    classify_http_failure, decode_inline_image, fetch_remote_image, BackendMode,
    GenerationError, GenerationRequest, GenerationResult, ProviderKind,
};
use crate::pipeline::error::ErrorKind;
use crate::pipeline::mask::HairMask;
use crate::pipeline::photo::Photo;
use crate::pipeline::settings_layer::OpenAiSettings;

const PROVIDER: ProviderKind = ProviderKind::OpenAi;

#[derive(Debug, Deserialize)]
struct ImagesEditsResponse {
    #[serde(default)]
    data: Vec<ImagesEditsResponseItem>,
}

#[derive(Debug, Deserialize)]
struct ImagesEditsResponseItem {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// OpenAI `/images/edits`. Serves every mode: the mask rides along as a
/// PNG whose transparent pixels mark the editable hair region.
#[derive(Clone)]
pub struct OpenAiImageBackend {
    transport: SharedHttpTransport,
    settings: OpenAiSettings,
    api_key: Option<String>,
}

impl OpenAiImageBackend {
    pub fn new(transport: SharedHttpTransport, settings: OpenAiSettings, api_key: Option<String>) -> Self {
        Self {
            transport,
            settings,
            api_key,
        }
    }

    pub fn supports(_mode: BackendMode) -> bool {
        true
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::new(
                PROVIDER,
                ErrorKind::AuthError,
                format!("missing {}", self.settings.api_key_env),
            )
        })?;
        let fields = self.form_fields(request)?;
        let url = format!("{}/images/edits", self.settings.endpoint.trim_end_matches('/'));
        let response = self
            .transport
            .send(
                HttpRequest::multipart(url, fields)
                    .with_header("authorization", format!("Bearer {api_key}")),
            )
            .await
            .map_err(|e| GenerationError::transport(PROVIDER, e))?;

        if !response.is_success() {
            let payload = response.json().unwrap_or(Value::Null);
            let code = payload
                .pointer("/error/code")
                .and_then(Value::as_str)
                .or_else(|| payload.pointer("/error/type").and_then(Value::as_str));
            let message = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| response.body_text());
            return Err(GenerationError::new(
                PROVIDER,
                classify_http_failure(response.status, code, message.as_str()),
                format!("HTTP {}: {}", response.status, message),
            ));
        }

        let payload: ImagesEditsResponse = serde_json::from_slice(response.body.as_slice())
            .map_err(|e| {
                GenerationError::new(
                    PROVIDER,
                    ErrorKind::Unknown,
                    format!("OpenAI JSON decode failed: {e}"),
                )
            })?;
        let Some(item) = payload.data.first() else {
            return Err(GenerationError::new(
                PROVIDER,
                ErrorKind::NoImageReturned,
                "OpenAI edit returned no image payload",
            ));
        };
        if let Some(b64) = item.b64_json.as_deref().filter(|v| !v.trim().is_empty()) {
            debug!(encoded_len = b64.len(), "openai returned inline image");
            return decode_inline_image(PROVIDER, b64);
        }
        if let Some(url) = item.url.as_deref() {
            return fetch_remote_image(PROVIDER, &self.transport, url, Vec::new()).await;
        }
        Err(GenerationError::new(
            PROVIDER,
            ErrorKind::NoImageReturned,
            "OpenAI edit returned neither b64_json nor url",
        ))
    }

    fn form_fields(&self, request: &GenerationRequest) -> Result<Vec<MultipartField>, GenerationError> {
        let mut fields = vec![
            MultipartField::text("model", self.settings.model.clone()),
            MultipartField::text("prompt", request.instructions.clone()),
            MultipartField::text("size", self.settings.size.clone()),
            MultipartField::text("quality", self.settings.quality.clone()),
            MultipartField::text("input_fidelity", self.settings.input_fidelity.clone()),
            MultipartField::png("image[]", "source.png", png_bytes(&request.source)?),
        ];
        match request.mode {
            BackendMode::DirectEdit => {}
            BackendMode::MaskInpaint => {
                let Some(mask) = request.mask.as_ref() else {
                    return Err(GenerationError::new(
                        PROVIDER,
                        ErrorKind::InvalidInput,
                        "mask-inpaint generation requires a hair mask",
                    ));
                };
                let mask_png = edit_mask_png(mask, self.settings.mask_cutoff)?;
                fields.push(MultipartField::png("mask", "mask.png", mask_png));
            }
            BackendMode::ReferenceGuided => {
                let Some(reference) = request.reference.as_ref() else {
                    return Err(GenerationError::new(
                        PROVIDER,
                        ErrorKind::InvalidInput,
                        "reference-guided generation requires a reference photo",
                    ));
                };
                fields.push(MultipartField::png("image[]", "reference.png", png_bytes(reference)?));
            }
        }
        Ok(fields)
    }
}

fn png_bytes(photo: &Photo) -> Result<Vec<u8>, GenerationError> {
    photo
        .encode_png()
        .map_err(|e| GenerationError::new(PROVIDER, ErrorKind::InvalidInput, e.to_string()))
}

/// Edit masks are inverted relative to [`HairMask`]: alpha 0 marks pixels the
/// provider may repaint, opaque pixels must be kept.
fn edit_mask_png(mask: &HairMask, cutoff: f32) -> Result<Vec<u8>, GenerationError> {
    let image = RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.alpha_at(x, y) > cutoff {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    png_bytes(&Photo::from_rgba(image).map_err(|e| {
        GenerationError::new(PROVIDER, ErrorKind::InvalidInput, e.to_string())
    })?)
}
