//! Provider backed by a third-party hosted inference API.
//!
//! The hosted model needs no explicit load step and has no multi-reference
//! endpoint. Reference audio travels inline as a data URI, and the rendered
//! audio comes back as a URL that is downloaded separately.

pub mod jobs;

pub use jobs::{HostedJobClient, JobRunner};

use super::TtsProvider;
use crate::audio::{self, CombineMode};
use crate::config_loader::Settings;
use crate::error::{ProviderError, Result};
use crate::selector::cloud_api_token_from_env;
use crate::types::{
    CombinedVoicePrompt, GeneratedAudio, GenerationRequest, HealthState, PromptOrigin,
    ProviderHealth, ProviderStatus, VoicePrompt, DEFAULT_MODEL_SIZE,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

pub const CLOUD_PROVIDER_ID: &str = "replicate";

/// Connection details for the hosted API, taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub api_base: String,
    pub tts_model: String,
    pub stt_model: String,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub download_timeout: Duration,
}

impl From<&Settings> for CloudSettings {
    fn from(s: &Settings) -> Self {
        Self {
            api_base: s.cloud_api_base.clone(),
            tts_model: s.cloud_tts_model.clone(),
            stt_model: s.cloud_stt_model.clone(),
            poll_interval: s.poll_interval(),
            job_timeout: s.job_timeout(),
            download_timeout: s.download_timeout(),
        }
    }
}

impl CloudSettings {
    fn job_client(&self) -> Result<Arc<dyn JobRunner>> {
        let token = cloud_api_token_from_env().ok_or_else(|| {
            ProviderError::Config(
                "REPLICATE_API_TOKEN or REPLICATE_API_KEY environment variable not set".into(),
            )
        })?;
        Ok(Arc::new(HostedJobClient::new(
            &self.api_base,
            token,
            self.poll_interval,
            self.job_timeout,
        )))
    }
}

/// Hands a blocking job to the worker pool and awaits its output.
async fn run_job(runner: Arc<dyn JobRunner>, model: String, input: Value) -> Result<Value> {
    tokio::task::spawn_blocking(move || runner.run(&model, &input)).await?
}

/// Picks the audio URL out of a finished synthesis job.
///
/// The output may be a URL, a list of URLs (the first wins) or any other value,
/// which is used as a string.
pub fn audio_url(output: &Value) -> Result<String> {
    let url = match output {
        Value::Array(items) => match items.first() {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if url.is_empty() {
        return Err(ProviderError::upstream(
            CLOUD_PROVIDER_ID,
            "no audio URL returned from synthesis job",
        ));
    }
    Ok(url)
}

pub struct CloudProvider {
    settings: CloudSettings,
    runner: RwLock<Option<Arc<dyn JobRunner>>>,
    download: reqwest::Client,
}

impl CloudProvider {
    pub fn new(settings: CloudSettings) -> Result<Self> {
        let download = reqwest::Client::builder()
            .timeout(settings.download_timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            settings,
            runner: RwLock::new(None),
            download,
        })
    }

    /// Builds an already-loaded provider around an existing job runner.
    pub fn with_runner(settings: CloudSettings, runner: Arc<dyn JobRunner>) -> Result<Self> {
        let provider = Self::new(settings)?;
        *provider.runner.write().unwrap_or_else(|e| e.into_inner()) = Some(runner);
        Ok(provider)
    }

    fn runner(&self) -> Option<Arc<dyn JobRunner>> {
        self.runner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn download_audio(&self, url: &str) -> Result<GeneratedAudio> {
        let response = self
            .download
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::transport(url, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpStatus {
                endpoint: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::transport(url, e))?;
        debug!(url, bytes = bytes.len(), "Downloaded synthesized audio");

        let (samples, sample_rate) = audio::decode_wav(&bytes).map_err(|e| {
            ProviderError::upstream(
                CLOUD_PROVIDER_ID,
                format!("undecodable audio at {}: {}", url, e),
            )
        })?;
        Ok(GeneratedAudio {
            samples,
            sample_rate,
        })
    }
}

#[async_trait]
impl TtsProvider for CloudProvider {
    fn id(&self) -> &'static str {
        CLOUD_PROVIDER_ID
    }

    /// Checks the credential and builds the job client. No network call.
    async fn load_model(&self, _model_size: &str) -> Result<()> {
        let runner = self.settings.job_client()?;
        *self.runner.write().unwrap_or_else(|e| e.into_inner()) = Some(runner);
        Ok(())
    }

    /// Drops the client; nothing is held server-side.
    async fn unload_model(&self) -> Result<()> {
        self.runner.write().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.runner().is_some()
    }

    /// The hosted API has no prompt cache: `use_cache` is accepted and ignored.
    async fn create_voice_prompt(
        &self,
        audio_path: &Path,
        reference_text: &str,
        _use_cache: bool,
    ) -> Result<(VoicePrompt, bool)> {
        let bytes = tokio::fs::read(audio_path).await?;
        let mime = audio::mime_for_extension(audio_path);
        let prompt = VoicePrompt::new(bytes, mime, reference_text, PromptOrigin::Cloud);
        Ok((prompt, false))
    }

    async fn combine_voice_prompts(
        &self,
        audio_paths: &[PathBuf],
        reference_texts: &[String],
    ) -> Result<CombinedVoicePrompt> {
        audio::combine_files(audio_paths, reference_texts, CombineMode::Resample).await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAudio> {
        request.validate()?;
        let prompt = &request.voice_prompt;
        let (Some(ref_audio), Some(mime)) = (prompt.audio(), prompt.mime_type()) else {
            return Err(ProviderError::InvalidInput(
                "reference audio is required for voice cloning".into(),
            ));
        };

        let runner = match self.runner() {
            Some(r) => r,
            None => {
                self.load_model(DEFAULT_MODEL_SIZE).await?;
                self.runner().ok_or(ProviderError::ModelNotLoaded)?
            }
        };

        let mut input = json!({
            "text": request.text,
            "mode": "Clone",
            "ref_audio": audio::encode_data_uri(mime, ref_audio),
        });
        if !prompt.reference_text().is_empty() {
            input["ref_text"] = json!(prompt.reference_text());
        }
        if let Some(seed) = request.seed {
            input["seed"] = json!(seed);
        }

        info!(
            model = %self.settings.tts_model,
            chars = request.text.chars().count(),
            "Submitting hosted synthesis job"
        );
        let output = run_job(runner, self.settings.tts_model.clone(), input).await?;
        let url = audio_url(&output)?;
        self.download_audio(&url).await
    }

    /// Metadata only; the hosted API is not probed.
    async fn health(&self) -> ProviderHealth {
        if self.is_loaded() || cloud_api_token_from_env().is_some() {
            ProviderHealth {
                status: HealthState::Healthy,
                provider: CLOUD_PROVIDER_ID.to_string(),
                version: None,
                model: Some(self.settings.tts_model.clone()),
                device: Some("cloud".to_string()),
            }
        } else {
            ProviderHealth::unhealthy(CLOUD_PROVIDER_ID)
        }
    }

    async fn status(&self) -> ProviderStatus {
        ProviderStatus {
            model_loaded: self.is_loaded(),
            model_size: None,
            available_sizes: vec![DEFAULT_MODEL_SIZE.to_string()],
            gpu_available: None,
            vram_used_mb: None,
        }
    }

    fn model_path(&self, _model_size: &str) -> String {
        self.settings.tts_model.clone()
    }

    async fn stop(&self) {}
}

/// Speech-to-text through the hosted Whisper job.
pub struct CloudTranscriber {
    model: String,
    runner: Arc<dyn JobRunner>,
}

impl CloudTranscriber {
    pub fn new(settings: &CloudSettings) -> Result<Self> {
        Ok(Self::with_runner(settings, settings.job_client()?))
    }

    pub fn with_runner(settings: &CloudSettings, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            model: settings.stt_model.clone(),
            runner,
        }
    }

    pub async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        let input = json!({
            "audio": audio::encode_data_uri("audio/wav", &bytes),
            "language": language.unwrap_or("en"),
        });

        let output = run_job(self.runner.clone(), self.model.clone(), input).await?;
        match output {
            Value::Object(map) => Ok(map
                .get("transcription")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()),
            Value::String(text) => Ok(text),
            Value::Null => Err(ProviderError::upstream(
                CLOUD_PROVIDER_ID,
                "transcription job returned no output",
            )),
            other => Ok(other.to_string()),
        }
    }
}
