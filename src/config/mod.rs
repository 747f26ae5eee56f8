//! Application configuration.
//!
//! Configuration comes from three layers, highest priority first: a YAML
//! file, environment variables (a `.env` file is honored via dotenvy),
//! and built-in defaults. Every load path ends in [`AppConfig::validate`].

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::gateway::{GatewayConfig, TurnDetection};
use crate::core::session::SessionTuning;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Remote voice-activity-detection knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Token collaborator endpoint that mints ephemeral credentials
    pub token_url: String,
    /// Text-translation endpoint on the same collaborator
    pub translate_url: Option<String>,
    /// Realtime model identifier
    pub model: String,
    /// Output voice identifier
    pub voice: String,
    /// BCP 47-ish code of the language being spoken
    pub source_language: String,
    /// Code of the language to translate into
    pub target_language: String,
    /// Override for the generated session instructions
    pub instructions: Option<String>,
    pub vad: VadSettings,
    pub finalize_timeout_ms: u64,
    pub resume_guard_ms: u64,
}

/// Optional overlay parsed from a YAML file; unset fields fall through to
/// the environment layer.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlOverlay {
    token_url: Option<String>,
    translate_url: Option<String>,
    model: Option<String>,
    voice: Option<String>,
    source_language: Option<String>,
    target_language: Option<String>,
    instructions: Option<String>,
    vad: Option<VadSettings>,
    finalize_timeout_ms: Option<u64>,
    resume_guard_ms: Option<u64>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

impl AppConfig {
    /// Load from environment variables (and `.env`) only.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let vad = VadSettings {
            threshold: env_parse("VAD_THRESHOLD")?.unwrap_or(0.5),
            prefix_padding_ms: env_parse("VAD_PREFIX_PADDING_MS")?.unwrap_or(300),
            silence_duration_ms: env_parse("VAD_SILENCE_DURATION_MS")?.unwrap_or(500),
        };
        let config = Self {
            token_url: env_string("TOKEN_URL").ok_or(ConfigError::Missing("TOKEN_URL"))?,
            translate_url: env_string("TRANSLATE_URL"),
            model: env_string("REALTIME_MODEL").unwrap_or_else(|| "gpt-realtime".to_string()),
            voice: env_string("VOICE").unwrap_or_else(|| "marin".to_string()),
            source_language: env_string("SOURCE_LANGUAGE").unwrap_or_else(|| "en".to_string()),
            target_language: env_string("TARGET_LANGUAGE").unwrap_or_else(|| "ne".to_string()),
            instructions: env_string("SESSION_INSTRUCTIONS"),
            vad,
            finalize_timeout_ms: env_parse("FINALIZE_TIMEOUT_MS")?.unwrap_or(10_000),
            resume_guard_ms: env_parse("RESUME_GUARD_MS")?.unwrap_or(300),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file, with environment variables filling any field
    /// the file leaves unset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let overlay: YamlOverlay =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let token_url = overlay
            .token_url
            .or_else(|| env_string("TOKEN_URL"))
            .ok_or(ConfigError::Missing("TOKEN_URL"))?;
        let vad = match overlay.vad {
            Some(vad) => vad,
            None => VadSettings {
                threshold: env_parse("VAD_THRESHOLD")?.unwrap_or(0.5),
                prefix_padding_ms: env_parse("VAD_PREFIX_PADDING_MS")?.unwrap_or(300),
                silence_duration_ms: env_parse("VAD_SILENCE_DURATION_MS")?.unwrap_or(500),
            },
        };
        let config = Self {
            token_url,
            translate_url: overlay.translate_url.or_else(|| env_string("TRANSLATE_URL")),
            model: overlay
                .model
                .or_else(|| env_string("REALTIME_MODEL"))
                .unwrap_or_else(|| "gpt-realtime".to_string()),
            voice: overlay
                .voice
                .or_else(|| env_string("VOICE"))
                .unwrap_or_else(|| "marin".to_string()),
            source_language: overlay
                .source_language
                .or_else(|| env_string("SOURCE_LANGUAGE"))
                .unwrap_or_else(|| "en".to_string()),
            target_language: overlay
                .target_language
                .or_else(|| env_string("TARGET_LANGUAGE"))
                .unwrap_or_else(|| "ne".to_string()),
            instructions: overlay
                .instructions
                .or_else(|| env_string("SESSION_INSTRUCTIONS")),
            vad,
            finalize_timeout_ms: match overlay.finalize_timeout_ms {
                Some(v) => v,
                None => env_parse("FINALIZE_TIMEOUT_MS")?.unwrap_or(10_000),
            },
            resume_guard_ms: match overlay.resume_guard_ms {
                Some(v) => v,
                None => env_parse("RESUME_GUARD_MS")?.unwrap_or(300),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.token_url).map_err(|e| ConfigError::Invalid {
            key: "TOKEN_URL",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "TOKEN_URL",
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if let Some(translate_url) = &self.translate_url {
            url::Url::parse(translate_url).map_err(|e| ConfigError::Invalid {
                key: "TRANSLATE_URL",
                reason: e.to_string(),
            })?;
        }
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(ConfigError::Invalid {
                key: "VAD_THRESHOLD",
                reason: format!("{} is outside 0.0..=1.0", self.vad.threshold),
            });
        }
        if self.finalize_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "FINALIZE_TIMEOUT_MS",
                reason: "must be positive".to_string(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "REALTIME_MODEL",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Session instructions, generated from the language pair unless
    /// overridden.
    pub fn session_instructions(&self) -> String {
        self.instructions.clone().unwrap_or_else(|| {
            format!(
                "You are a speech translator. Translate everything the user says \
                 from {src} into {dst}. Respond only with the translation, spoken \
                 naturally in {dst}. Never answer questions or add commentary.",
                src = self.source_language,
                dst = self.target_language,
            )
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            token_url: self.token_url.clone(),
            model: self.model.clone(),
            voice: Some(self.voice.clone()),
            instructions: Some(self.session_instructions()),
            turn_detection: TurnDetection::ServerVad {
                threshold: Some(self.vad.threshold),
                prefix_padding_ms: Some(self.vad.prefix_padding_ms),
                silence_duration_ms: Some(self.vad.silence_duration_ms),
                create_response: Some(true),
            },
            ..GatewayConfig::default()
        }
    }

    pub fn session_tuning(&self) -> SessionTuning {
        SessionTuning {
            finalize_timeout: Duration::from_millis(self.finalize_timeout_ms),
            resume_guard: Duration::from_millis(self.resume_guard_ms),
            manual_commit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            token_url: "https://token.example.com/session".to_string(),
            translate_url: None,
            model: "gpt-realtime".to_string(),
            voice: "marin".to_string(),
            source_language: "en".to_string(),
            target_language: "ne".to_string(),
            instructions: None,
            vad: VadSettings::default(),
            finalize_timeout_ms: 10_000,
            resume_guard_ms: 300,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_token_url() {
        let mut config = base_config();
        config.token_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "TOKEN_URL", .. })
        ));

        config.token_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_vad_threshold() {
        let mut config = base_config();
        config.vad.threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "VAD_THRESHOLD", .. })
        ));
    }

    #[test]
    fn test_rejects_zero_finalize_timeout() {
        let mut config = base_config();
        config.finalize_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generated_instructions_name_both_languages() {
        let config = base_config();
        let instructions = config.session_instructions();
        assert!(instructions.contains("en"));
        assert!(instructions.contains("ne"));
    }

    #[test]
    fn test_instruction_override_wins() {
        let mut config = base_config();
        config.instructions = Some("custom".to_string());
        assert_eq!(config.session_instructions(), "custom");
    }

    #[test]
    fn test_yaml_overlay_parses() {
        let overlay: YamlOverlay = serde_yaml::from_str(
            "token_url: https://token.example.com/session\n\
             voice: cedar\n\
             vad:\n  threshold: 0.7\n",
        )
        .unwrap();
        assert_eq!(
            overlay.token_url.as_deref(),
            Some("https://token.example.com/session")
        );
        assert_eq!(overlay.voice.as_deref(), Some("cedar"));
        assert_eq!(overlay.vad.unwrap().threshold, 0.7);
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        let result = serde_yaml::from_str::<YamlOverlay>("bogus_setting: 1\n");
        assert!(result.is_err());
    }
}
