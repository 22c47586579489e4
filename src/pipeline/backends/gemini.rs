use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::transport::{HttpRequest, SharedHttpTransport};
use super::{
    classify_http_failure, decode_inline_image, fetch_remote_image, BackendMode,
    GenerationError, GenerationRequest, GenerationResult, ProviderKind,
};
use crate::pipeline::error::ErrorKind;
use crate::pipeline::photo::Photo;
use crate::pipeline::settings_layer::GeminiSettings;

const PROVIDER: ProviderKind = ProviderKind::Gemini;

/// Finish reasons that mean the candidate was withheld or censored.
const BLOCKING_FINISH_REASONS: [&str; 6] = [
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
    #[serde(default, rename = "fileData", alias = "file_data")]
    file_data: Option<FileData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct FileData {
    #[serde(rename = "fileUri", alias = "file_uri")]
    file_uri: String,
}

enum ImagePayload<'a> {
    Inline(&'a str),
    Remote(&'a str),
}

/// Gemini `generateContent` image editing. No mask input exists on this API,
/// so only direct and reference-guided edits are served.
#[derive(Clone)]
pub struct GeminiImageBackend {
    transport: SharedHttpTransport,
    settings: GeminiSettings,
    api_key: Option<String>,
}

impl GeminiImageBackend {
    pub fn new(transport: SharedHttpTransport, settings: GeminiSettings, api_key: Option<String>) -> Self {
        Self {
            transport,
            settings,
            api_key,
        }
    }

    pub fn supports(mode: BackendMode) -> bool {
        matches!(mode, BackendMode::DirectEdit | BackendMode::ReferenceGuided)
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        if !Self::supports(request.mode) {
            return Err(GenerationError::new(
                PROVIDER,
                ErrorKind::InvalidInput,
                format!("gemini cannot serve {}", request.mode.as_str()),
            ));
        }
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::new(
                PROVIDER,
                ErrorKind::AuthError,
                format!("missing {}", self.settings.api_key_env),
            )
        })?;
        let body = self.request_body(request)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        );
        let response = self
            .transport
            .send(HttpRequest::json(url, body).with_header("x-goog-api-key", api_key))
            .await
            .map_err(|e| GenerationError::transport(PROVIDER, e))?;

        if !response.is_success() {
            let payload = response.json().unwrap_or(Value::Null);
            let status_code = payload.pointer("/error/status").and_then(Value::as_str);
            let message = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| response.body_text());
            return Err(GenerationError::new(
                PROVIDER,
                classify_http_failure(response.status, status_code, message.as_str()),
                format!("HTTP {}: {}", response.status, message),
            ));
        }

        let parsed: GenerateContentResponse = serde_json::from_slice(response.body.as_slice())
            .map_err(|e| {
                GenerationError::new(
                    PROVIDER,
                    ErrorKind::Unknown,
                    format!("response JSON decode failed: {e}"),
                )
            })?;
        match extract_image_payload(&parsed)? {
            ImagePayload::Inline(b64) => {
                debug!(encoded_len = b64.len(), "gemini returned inline image");
                decode_inline_image(PROVIDER, b64)
            }
            ImagePayload::Remote(uri) => {
                let headers = self.file_auth_headers(uri, api_key);
                fetch_remote_image(PROVIDER, &self.transport, uri, headers).await
            }
        }
    }

    /// Hosted file URIs on the API host need the key; other hosts never see it.
    fn file_auth_headers(&self, uri: &str, api_key: &str) -> Vec<(String, String)> {
        let api_host = Url::parse(self.settings.endpoint.as_str())
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        let file_host = Url::parse(uri)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        match (api_host, file_host) {
            (Some(api), Some(file)) if api.eq_ignore_ascii_case(file.as_str()) => {
                vec![(String::from("x-goog-api-key"), api_key.to_string())]
            }
            _ => Vec::new(),
        }
    }

    fn request_body(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let mut parts = vec![inline_png_part(&request.source)?];
        if request.mode == BackendMode::ReferenceGuided {
            if let Some(reference) = request.reference.as_ref() {
                parts.push(inline_png_part(reference)?);
            }
        }
        parts.push(json!({ "text": request.instructions }));
        Ok(json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
        }))
    }
}

fn inline_png_part(photo: &Photo) -> Result<Value, GenerationError> {
    let png = photo
        .encode_png()
        .map_err(|e| GenerationError::new(PROVIDER, ErrorKind::InvalidInput, e.to_string()))?;
    Ok(json!({
        "inline_data": { "mime_type": "image/png", "data": BASE64_STANDARD.encode(png) }
    }))
}

fn extract_image_payload(
    response: &GenerateContentResponse,
) -> Result<ImagePayload<'_>, GenerationError> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(GenerationError::new(
            PROVIDER,
            ErrorKind::SafetyBlocked,
            format!("prompt blocked: {reason}"),
        ));
    }
    let Some(candidate) = response.candidates.first() else {
        return Err(GenerationError::new(
            PROVIDER,
            ErrorKind::NoImageReturned,
            "response contained no candidates",
        ));
    };
    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|r| BLOCKING_FINISH_REASONS.contains(r))
    {
        return Err(GenerationError::new(
            PROVIDER,
            ErrorKind::SafetyBlocked,
            format!("candidate withheld: finishReason {reason}"),
        ));
    }

    let parts = candidate
        .content
        .as_ref()
        .map(|c| c.parts.as_slice())
        .unwrap_or_default();
    for part in parts {
        if let Some(inline) = part.inline_data.as_ref() {
            let is_image = inline
                .mime_type
                .as_deref()
                .map(|m| m.starts_with("image/"))
                .unwrap_or(true);
            if is_image && !inline.data.trim().is_empty() {
                return Ok(ImagePayload::Inline(inline.data.as_str()));
            }
        }
        if let Some(file) = part.file_data.as_ref() {
            return Ok(ImagePayload::Remote(file.file_uri.as_str()));
        }
    }

    let text = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join(" ");
    let detail = if text.trim().is_empty() {
        String::from("response contained no image part")
    } else {
        format!("response contained only text: {}", truncate(text.trim(), 200))
    };
    Err(GenerationError::new(PROVIDER, ErrorKind::NoImageReturned, detail))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push('…');
    out
}
