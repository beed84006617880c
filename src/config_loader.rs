use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Sidecar provider process
    pub provider_url: Option<String>,
    pub provider_timeout_secs: u64, // Generation can take minutes on a cold sidecar
    // Cloud (hosted inference)
    pub cloud_api_base: String,
    pub cloud_tts_model: String,
    pub cloud_stt_model: String,
    pub cloud_poll_interval_ms: u64,
    pub cloud_job_timeout_secs: u64,
    pub download_timeout_secs: u64, // Static artifact fetch, not a generation call
    // Generation defaults
    pub default_model_size: String,
    pub default_language: String,
}

pub const DEFAULT_CLOUD_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_CLOUD_TTS_MODEL: &str = "qwen/qwen3-tts";
pub const DEFAULT_CLOUD_STT_MODEL: &str =
    "openai/whisper:4d50797290df275329f202e48c76360b3f22b08d28c196cbc54600319435f8d2";

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_url: None,
            provider_timeout_secs: 300,
            cloud_api_base: DEFAULT_CLOUD_API_BASE.to_string(),
            cloud_tts_model: DEFAULT_CLOUD_TTS_MODEL.to_string(),
            cloud_stt_model: DEFAULT_CLOUD_STT_MODEL.to_string(),
            cloud_poll_interval_ms: 1000,
            cloud_job_timeout_secs: 900,
            download_timeout_secs: 60,
            default_model_size: crate::types::DEFAULT_MODEL_SIZE.to_string(),
            default_language: "en".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let home = dirs::home_dir()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());

        let builder = Config::builder()
            .set_default("provider_timeout_secs", 300)?
            .set_default("cloud_api_base", DEFAULT_CLOUD_API_BASE)?
            .set_default("cloud_tts_model", DEFAULT_CLOUD_TTS_MODEL)?
            .set_default("cloud_stt_model", DEFAULT_CLOUD_STT_MODEL)?
            .set_default("cloud_poll_interval_ms", 1000)?
            .set_default("cloud_job_timeout_secs", 900)?
            .set_default("download_timeout_secs", 60)?
            .set_default("default_model_size", crate::types::DEFAULT_MODEL_SIZE)?
            .set_default("default_language", "en")?
            // Local config file first, then the per-user one
            .add_source(File::with_name("Voicebox").required(false))
            .add_source(
                File::with_name(&format!("{}/.config/voicebox/Voicebox", home)).required(false),
            )
            // e.g. VOICEBOX_PROVIDER_URL=http://127.0.0.1:8000
            .add_source(Environment::with_prefix("VOICEBOX"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.provider_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "HTTP timeouts must be greater than 0".to_string(),
            ));
        }
        if self.cloud_poll_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "cloud_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.cloud_job_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "cloud_job_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.default_model_size.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "default_model_size cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cloud_poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud_job_timeout_secs)
    }
}
