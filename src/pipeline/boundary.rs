use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::pipeline::backends::transport::{HttpRequest, SharedHttpTransport};
use crate::pipeline::photo::Photo;
use crate::pipeline::settings_layer::VisionSettings;

/// Face location as fractions of the photo's width (x) and height (y).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceBoundary {
    pub forehead_top: f32,
    pub eye_level: f32,
    pub face_left: f32,
    pub face_right: f32,
    pub chin_bottom: f32,
}

impl FaceBoundary {
    pub const FALLBACK: Self = Self {
        forehead_top: 0.25,
        eye_level: 0.35,
        face_left: 0.30,
        face_right: 0.70,
        chin_bottom: 0.70,
    };

    pub fn is_valid(&self) -> bool {
        let values = [
            self.forehead_top,
            self.eye_level,
            self.face_left,
            self.face_right,
            self.chin_bottom,
        ];
        values
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
            && self.face_left < self.face_right
            && self.forehead_top < self.eye_level
            && self.eye_level < self.chin_bottom
    }

    pub fn face_width(&self) -> f32 {
        self.face_right - self.face_left
    }

    pub fn face_center_x(&self) -> f32 {
        (self.face_left + self.face_right) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySource {
    Service,
    Fallback,
}

impl BoundarySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryEstimate {
    pub boundary: FaceBoundary,
    pub source: BoundarySource,
}

impl BoundaryEstimate {
    fn fallback() -> Self {
        Self {
            boundary: FaceBoundary::FALLBACK,
            source: BoundarySource::Fallback,
        }
    }
}

const BOUNDARY_PROMPT: &str = "Locate the single most prominent human face in this portrait. \
Return the face boundary as fractions of the image size (0 = top/left edge, 1 = bottom/right edge): \
foreheadTop is the natural hairline, eyeLevel the line through both pupils, faceLeft and faceRight \
the outer cheek edges, chinBottom the lowest point of the chin.";

/// Asks a vision service where the face is. Never fails: any problem yields
/// [`FaceBoundary::FALLBACK`].
#[derive(Clone)]
pub struct FaceBoundaryEstimator {
    transport: SharedHttpTransport,
    settings: VisionSettings,
    api_key: Option<String>,
}

impl FaceBoundaryEstimator {
    pub fn new(
        transport: SharedHttpTransport,
        settings: VisionSettings,
        api_key: Option<String>,
    ) -> Self {
        Self {
            transport,
            settings,
            api_key,
        }
    }

    pub async fn estimate(&self, photo: &Photo) -> FaceBoundary {
        self.estimate_detailed(photo).await.boundary
    }

    pub async fn estimate_detailed(&self, photo: &Photo) -> BoundaryEstimate {
        match self.query_service(photo).await {
            Ok(boundary) => {
                debug!(?boundary, "face boundary estimated by vision service");
                BoundaryEstimate {
                    boundary,
                    source: BoundarySource::Service,
                }
            }
            Err(reason) => {
                warn!(reason = %reason, "face boundary estimation fell back to heuristic");
                BoundaryEstimate::fallback()
            }
        }
    }

    async fn query_service(&self, photo: &Photo) -> Result<FaceBoundary, String> {
        if !self.settings.enabled {
            return Err(String::from("vision service disabled"));
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| format!("missing {}", self.settings.api_key_env))?;
        let png = photo
            .encode_png()
            .map_err(|e| format!("photo encode failed: {e}"))?;
        let request = HttpRequest::json(
            format!(
                "{}/models/{}:generateContent",
                self.settings.endpoint.trim_end_matches('/'),
                self.settings.model
            ),
            boundary_request_body(png.as_slice()),
        )
        .with_header("x-goog-api-key", api_key);

        let timeout = Duration::from_secs(self.settings.timeout_secs.max(1));
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| format!("timed out after {}s", timeout.as_secs()))?
            .map_err(|e| e.to_string())?;
        if !response.is_success() {
            return Err(format!("HTTP {}", response.status));
        }
        let payload = response
            .json()
            .map_err(|e| format!("response JSON decode failed: {e}"))?;
        parse_boundary_response(&payload)
    }
}

fn boundary_request_body(png: &[u8]) -> Value {
    let number = json!({ "type": "NUMBER" });
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "text": BOUNDARY_PROMPT },
                { "inline_data": { "mime_type": "image/png", "data": BASE64_STANDARD.encode(png) } }
            ]
        }],
        "generationConfig": {
            "temperature": 0,
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "foreheadTop": number,
                    "eyeLevel": number,
                    "faceLeft": number,
                    "faceRight": number,
                    "chinBottom": number
                },
                "required": ["foreheadTop", "eyeLevel", "faceLeft", "faceRight", "chinBottom"]
            }
        }
    })
}

fn parse_boundary_response(payload: &Value) -> Result<FaceBoundary, String> {
    if let Some(reason) = payload
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(format!("request blocked: {reason}"));
    }
    let text = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    if text.trim().is_empty() {
        return Err(String::from("response carried no text part"));
    }
    let boundary: FaceBoundary = serde_json::from_str(strip_code_fence(text.as_str()))
        .map_err(|e| format!("structured output unparsable: {e}"))?;
    if !boundary.is_valid() {
        return Err(format!("boundary violates ordering invariants: {boundary:?}"));
    }
    Ok(boundary)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
