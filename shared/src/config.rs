//! Runtime configuration for the intake pipeline.
//!
//! Every section has working defaults; a TOML file only needs to name the
//! values it overrides.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::capabilities::{ValidatedUrl, MAX_TIMEOUT_MS};
use crate::{DEFAULT_STORAGE_SLOT, MAX_IMAGE_BYTES, MIN_TRANSCRIPT_CHARS};

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/reverse";
pub const DEFAULT_INFERENCE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_INFERENCE_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_USER_AGENT: &str = concat!("vanrakshak/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntakeConfig {
    pub geocoding: GeocodingConfig,
    pub inference: InferenceConfig,
    pub submission: SubmissionConfig,
    pub voice: VoiceConfig,
    pub image: ImageConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeocodingConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOCODER_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_INFERENCE_MODEL.to_string(),
            api_key: None,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubmissionConfig {
    /// Remote sync is disabled when unset.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoiceConfig {
    pub quiescence_ms: u64,
    pub min_transcript_chars: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            quiescence_ms: 1_500,
            min_transcript_chars: MIN_TRANSCRIPT_CHARS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub max_bytes: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_bytes: MAX_IMAGE_BYTES,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub slot: String,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            slot: DEFAULT_STORAGE_SLOT.to_string(),
            data_dir: PathBuf::from(".vanrakshak"),
        }
    }
}

impl IntakeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("geocoding.base_url", &self.geocoding.base_url)?;
        check_url("inference.endpoint", &self.inference.endpoint)?;
        if let Some(endpoint) = &self.submission.endpoint {
            check_url("submission.endpoint", endpoint)?;
        }

        // Requests refuse timeouts above MAX_TIMEOUT_MS
        for (name, value) in [
            ("geocoding.timeout_ms", self.geocoding.timeout_ms),
            ("inference.timeout_ms", self.inference.timeout_ms),
            ("submission.timeout_ms", self.submission.timeout_ms),
        ] {
            if !(1..=MAX_TIMEOUT_MS).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 1..={MAX_TIMEOUT_MS}"
                )));
            }
        }
        if self.voice.quiescence_ms == 0 {
            return Err(ConfigError::Invalid("voice.quiescence_ms must be > 0".into()));
        }

        if self.geocoding.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "geocoding.user_agent cannot be empty".into(),
            ));
        }
        if self.inference.model.trim().is_empty() {
            return Err(ConfigError::Invalid("inference.model cannot be empty".into()));
        }
        if self.image.max_bytes == 0 {
            return Err(ConfigError::Invalid("image.max_bytes must be > 0".into()));
        }
        if self.storage.slot.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.slot cannot be empty".into()));
        }
        Ok(())
    }

    pub fn geocoder_url(&self) -> Result<ValidatedUrl, ConfigError> {
        parse_url("geocoding.base_url", &self.geocoding.base_url)
    }

    pub fn inference_url(&self) -> Result<ValidatedUrl, ConfigError> {
        parse_url("inference.endpoint", &self.inference.endpoint)
    }

    pub fn submission_url(&self) -> Result<Option<ValidatedUrl>, ConfigError> {
        self.submission
            .endpoint
            .as_deref()
            .map(|raw| parse_url("submission.endpoint", raw))
            .transpose()
    }

    #[must_use]
    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_millis(self.geocoding.timeout_ms)
    }

    #[must_use]
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference.timeout_ms)
    }

    #[must_use]
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission.timeout_ms)
    }

    #[must_use]
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.voice.quiescence_ms)
    }
}

fn parse_url(name: &str, raw: &str) -> Result<ValidatedUrl, ConfigError> {
    ValidatedUrl::new(raw).map_err(|e| ConfigError::Invalid(format!("{name}: {e}")))
}

fn check_url(name: &str, raw: &str) -> Result<(), ConfigError> {
    parse_url(name, raw).map(|_| ())
}
