use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::backends::ProviderKind;
use crate::pipeline::compositor::BlendThresholds;
use crate::pipeline::dotenv::{load_dotenv_map, resolve_secret};
use crate::pipeline::mask::MaskGeometry;
use crate::pipeline::orchestrator::TransformStrategy;

pub const DEFAULT_SETTINGS_PATH: &str = "config/hair_pipeline.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Upper bound for any single outbound request.
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::from("https://generativelanguage.googleapis.com/v1beta"),
            model: String::from("gemini-2.0-flash"),
            api_key_env: String::from("GEMINI_API_KEY"),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://generativelanguage.googleapis.com/v1beta"),
            model: String::from("gemini-2.5-flash-image"),
            api_key_env: String::from("GEMINI_API_KEY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub size: String,
    pub quality: String,
    pub input_fidelity: String,
    /// Mask alpha above this value is sent as editable.
    pub mask_cutoff: f32,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://api.openai.com/v1"),
            model: String::from("gpt-image-1"),
            api_key_env: String::from("OPENAI_API_KEY"),
            size: String::from("auto"),
            quality: String::from("high"),
            input_fidelity: String::from("high"),
            mask_cutoff: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub direct_edit: ProviderKind,
    pub mask_inpaint: ProviderKind,
    pub reference_guided: ProviderKind,
    /// Strategy used when the caller names none and gives no reference.
    pub default_strategy: TransformStrategy,
    /// Strategy used when the caller names none but gives a reference.
    pub reference_strategy: TransformStrategy,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            direct_edit: ProviderKind::Gemini,
            mask_inpaint: ProviderKind::OpenAi,
            reference_guided: ProviderKind::Gemini,
            default_strategy: TransformStrategy::Inpaint,
            reference_strategy: TransformStrategy::ReferenceGuided,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub http: HttpSettings,
    pub vision: VisionSettings,
    pub gemini: GeminiSettings,
    pub openai: OpenAiSettings,
    pub routing: RoutingSettings,
    pub mask: MaskGeometry,
    pub compositor: BlendThresholds,
}

/// API keys resolved from the process environment or `.env`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderSecrets {
    pub vision_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl std::fmt::Debug for ProviderSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSecrets")
            .field("vision_api_key", &self.vision_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub settings: PipelineSettings,
    pub secrets: ProviderSecrets,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read pipeline settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse pipeline settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("pipeline settings field '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.compositor.is_valid() {
            return Err(invalid(
                "compositor",
                format!(
                    "need 0 <= low < high <= 1, got low={} high={}",
                    self.compositor.low, self.compositor.high
                ),
            ));
        }
        let g = &self.mask;
        let positive = [
            ("mask.top_width_factor", g.top_width_factor),
            ("mask.side_width_factor", g.side_width_factor),
            ("mask.feather_fraction", g.feather_fraction),
            ("mask.min_face_width", g.min_face_width),
            ("mask.fallback_cutoff", g.fallback_cutoff),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(field, format!("must be positive, got {value}")));
            }
        }
        if !(g.forehead_margin.is_finite() && g.forehead_margin >= 0.0) {
            return Err(invalid("mask.forehead_margin", "must not be negative"));
        }
        if g.fallback_cutoff > 1.0 || g.min_face_width > 1.0 {
            return Err(invalid(
                "mask",
                "fallback_cutoff and min_face_width are fractions of the image",
            ));
        }
        if !(0.0..=1.0).contains(&self.openai.mask_cutoff) {
            return Err(invalid("openai.mask_cutoff", "must be within 0..=1"));
        }
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", "must be at least 1"));
        }
        if self.vision.timeout_secs == 0 {
            return Err(invalid("vision.timeout_secs", "must be at least 1"));
        }
        for (field, value) in [
            ("vision.api_key_env", self.vision.api_key_env.as_str()),
            ("gemini.api_key_env", self.gemini.api_key_env.as_str()),
            ("openai.api_key_env", self.openai.api_key_env.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "must name an environment variable"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidField {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Loads settings and secrets. An explicit path must exist; the default
/// path is optional and missing means built-in defaults.
pub fn load_pipeline_config(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<PipelineConfig, SettingsError> {
    let settings = load_pipeline_settings(app_root, explicit_path)?;
    let secrets = resolve_provider_secrets(app_root, &settings);
    Ok(PipelineConfig { settings, secrets })
}

pub fn load_pipeline_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<PipelineSettings, SettingsError> {
    let settings = if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) })
    {
        read_settings_file(path.as_path())?
    } else {
        let default_path = app_root.join(DEFAULT_SETTINGS_PATH);
        if default_path.exists() {
            read_settings_file(default_path.as_path())?
        } else {
            debug!("no pipeline settings file, using built-in defaults");
            PipelineSettings::default()
        }
    };
    settings.validate()?;
    Ok(settings)
}

pub fn parse_pipeline_settings_toml(raw: &str, path: &str) -> Result<PipelineSettings, SettingsError> {
    toml::from_str::<PipelineSettings>(raw).map_err(|error| SettingsError::ParseToml {
        path: path.to_string(),
        message: error.to_string(),
    })
}

fn read_settings_file(path: &Path) -> Result<PipelineSettings, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parse_pipeline_settings_toml(raw.as_str(), path.display().to_string().as_str())
}

pub fn resolve_provider_secrets(app_root: &Path, settings: &PipelineSettings) -> ProviderSecrets {
    let dotenv = load_dotenv_map(app_root).unwrap_or_else(|error| {
        warn!(error = %error, "failed to read .env, continuing with process environment only");
        Default::default()
    });
    ProviderSecrets {
        vision_api_key: resolve_secret(settings.vision.api_key_env.as_str(), &dotenv),
        gemini_api_key: resolve_secret(settings.gemini.api_key_env.as_str(), &dotenv),
        openai_api_key: resolve_secret(settings.openai.api_key_env.as_str(), &dotenv),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn temp_root(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("hairlab_settings_{label}_{stamp}"));
        fs::create_dir_all(root.join("config")).expect("temp config dir should be created");
        root
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let settings = parse_pipeline_settings_toml(
            r#"
[routing]
direct_edit = "openai"
reference_strategy = "overlay"

[compositor]
low = 0.1

[mask]
top_width_factor = 2.0
"#,
            "inline",
        )
        .expect("settings should parse");

        assert_eq!(settings.routing.direct_edit, ProviderKind::OpenAi);
        assert_eq!(settings.routing.mask_inpaint, ProviderKind::OpenAi);
        assert_eq!(settings.routing.reference_strategy, TransformStrategy::Overlay);
        assert_eq!(settings.compositor, BlendThresholds { low: 0.1, high: 0.8 });
        assert_eq!(settings.mask.top_width_factor, 2.0);
        assert_eq!(settings.mask.side_width_factor, 0.4);
        assert_eq!(settings.vision.timeout_secs, 20);
    }

    #[test]
    fn example_config_matches_built_in_defaults() {
        let settings = parse_pipeline_settings_toml(
            include_str!("../../config/hair_pipeline.example.toml"),
            "config/hair_pipeline.example.toml",
        )
        .expect("example config should parse");

        assert_eq!(settings, PipelineSettings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut settings = PipelineSettings::default();
        settings.compositor = BlendThresholds { low: 0.8, high: 0.8 };

        let err = settings.validate().expect_err("low == high must fail");

        assert!(matches!(err, SettingsError::InvalidField { ref field, .. } if field == "compositor"));
    }

    #[test]
    fn rejects_non_positive_geometry() {
        let mut settings = PipelineSettings::default();
        settings.mask.top_width_factor = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = PipelineSettings::default();
        settings.mask.fallback_cutoff = f32::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn unknown_provider_is_a_parse_error() {
        let err = parse_pipeline_settings_toml("[routing]\ndirect_edit = \"midjourney\"\n", "inline")
            .expect_err("unknown provider");
        assert!(matches!(err, SettingsError::ParseToml { .. }));
    }

    #[test]
    fn loads_default_path_and_dotenv_secrets() {
        let root = temp_root("default_path");
        fs::write(
            root.join(DEFAULT_SETTINGS_PATH),
            "[openai]\napi_key_env = \"HAIRLAB_TEST_OPENAI_KEY_UNSET_IN_ENV\"\n\
             [gemini]\napi_key_env = \"HAIRLAB_TEST_GEMINI_KEY_UNSET_IN_ENV\"\n\
             [vision]\napi_key_env = \"HAIRLAB_TEST_GEMINI_KEY_UNSET_IN_ENV\"\n",
        )
        .expect("settings should be written");
        fs::write(
            root.join(".env"),
            "HAIRLAB_TEST_OPENAI_KEY_UNSET_IN_ENV=sk-from-dotenv\nHAIRLAB_TEST_GEMINI_KEY_UNSET_IN_ENV=\n",
        )
        .expect(".env should be written");

        let config = load_pipeline_config(root.as_path(), None).expect("config should load");

        assert_eq!(config.secrets.openai_api_key.as_deref(), Some("sk-from-dotenv"));
        assert_eq!(config.secrets.gemini_api_key, None);
        assert_eq!(config.secrets.vision_api_key, None);
        assert!(!format!("{:?}", config.secrets).contains("sk-from-dotenv"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn explicit_path_must_exist() {
        let root = temp_root("explicit_missing");

        let err = load_pipeline_settings(root.as_path(), Some("config/nope.toml"))
            .expect_err("missing explicit file");

        assert!(matches!(err, SettingsError::ReadFile { .. }));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_default_path_uses_defaults() {
        let root = std::env::temp_dir().join("hairlab_settings_definitely_absent_root");

        let settings = load_pipeline_settings(root.as_path(), None).expect("defaults");

        assert_eq!(settings, PipelineSettings::default());
    }
}
