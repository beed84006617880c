//! Provider backed by a sidecar process that serves the TTS model over HTTP.

use super::TtsProvider;
use crate::audio::{self, CombineMode};
use crate::error::{ProviderError, Result};
use crate::types::{
    CombinedVoicePrompt, GeneratedAudio, GenerationRequest, HealthState, PromptOrigin,
    ProviderHealth, ProviderStatus, VoicePrompt, DEFAULT_MODEL_SIZE,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROVIDER_ID: &str = "local";

#[derive(Deserialize)]
struct GenerateResponse {
    audio: String,
    sample_rate: u32,
}

#[derive(Deserialize)]
struct CreatePromptResponse {
    voice_prompt: serde_json::Value,
    #[serde(default)]
    was_cached: bool,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
    provider: String,
    version: Option<String>,
    model: Option<String>,
    device: Option<String>,
}

pub struct RemoteProcessProvider {
    base_url: String,
    /// Shared by every call; `None` once stopped.
    client: RwLock<Option<Client>>,
    /// Size sent with the next `generate`.
    model_size: RwLock<String>,
}

impl RemoteProcessProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: RwLock::new(Some(client)),
            model_size: RwLock::new(DEFAULT_MODEL_SIZE.to_string()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The model size the next `generate` call will request.
    pub fn model_size(&self) -> String {
        self.model_size
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn client(&self) -> Result<Client> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ProviderError::Stopped)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::transport(endpoint, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ProviderError::upstream(PROVIDER_ID, format!("malformed JSON from {}: {}", endpoint, e))
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let endpoint = self.endpoint(path);
        let response = self
            .client()?
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| ProviderError::transport(&endpoint, e))?;
        Self::read_json(&endpoint, response).await
    }
}

#[async_trait]
impl TtsProvider for RemoteProcessProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    /// Only records the size; the sidecar loads it on the next `generate`.
    async fn load_model(&self, model_size: &str) -> Result<()> {
        let mut current = self.model_size.write().unwrap_or_else(|e| e.into_inner());
        if *current != model_size {
            info!(from = %*current, to = model_size, "Sidecar model size changed");
            *current = model_size.to_string();
        }
        Ok(())
    }

    /// The sidecar owns its model lifecycle.
    async fn unload_model(&self) -> Result<()> {
        Ok(())
    }

    /// Always true: a real answer needs a round trip to the sidecar.
    fn is_loaded(&self) -> bool {
        true
    }

    async fn create_voice_prompt(
        &self,
        audio_path: &Path,
        reference_text: &str,
        use_cache: bool,
    ) -> Result<(VoicePrompt, bool)> {
        let audio = tokio::fs::read(audio_path).await?;
        let endpoint = self.endpoint("/tts/create_voice_prompt");

        let part = Part::bytes(audio.clone())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ProviderError::transport(&endpoint, e))?;
        let form = Form::new()
            .part("audio", part)
            .text("reference_text", reference_text.to_string())
            .text("use_cache", if use_cache { "true" } else { "false" });

        let response = self
            .client()?
            .post(&endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::transport(&endpoint, e))?;
        let created: CreatePromptResponse = Self::read_json(&endpoint, response).await?;

        debug!(was_cached = created.was_cached, "Sidecar built voice prompt");
        let prompt = VoicePrompt::new(
            audio,
            audio::mime_for_extension(audio_path),
            reference_text,
            PromptOrigin::Remote,
        )
        .with_payload(created.voice_prompt);
        Ok((prompt, created.was_cached))
    }

    /// The sidecar has no combine endpoint, so clips are merged here.
    async fn combine_voice_prompts(
        &self,
        audio_paths: &[PathBuf],
        reference_texts: &[String],
    ) -> Result<CombinedVoicePrompt> {
        audio::combine_files(audio_paths, reference_texts, CombineMode::Normalize).await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAudio> {
        request.validate()?;
        let endpoint = self.endpoint("/tts/generate");

        let voice_prompt = match request.voice_prompt.payload() {
            Some(payload) => payload.clone(),
            None => serde_json::to_value(&request.voice_prompt)
                .map_err(|e| ProviderError::InvalidInput(format!("voice prompt: {}", e)))?,
        };
        if request.instruct.is_some() {
            debug!("Sidecar generate ignores delivery instructions");
        }
        let model_size = self.model_size();
        let body = json!({
            "text": request.text,
            "voice_prompt": voice_prompt,
            "language": request.language,
            "seed": request.seed,
            "model_size": model_size,
        });

        let response = self
            .client()?
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(&endpoint, e))?;
        let generated: GenerateResponse = Self::read_json(&endpoint, response).await?;

        let wav = STANDARD.decode(generated.audio.as_bytes()).map_err(|e| {
            ProviderError::upstream(PROVIDER_ID, format!("audio is not valid base64: {}", e))
        })?;
        let (samples, _) = audio::decode_wav(&wav).map_err(|e| {
            ProviderError::upstream(PROVIDER_ID, format!("audio is not a WAV file: {}", e))
        })?;

        Ok(GeneratedAudio {
            samples,
            sample_rate: generated.sample_rate,
        })
    }

    async fn health(&self) -> ProviderHealth {
        match self.get_json::<HealthResponse>("/tts/health").await {
            Ok(h) => ProviderHealth {
                status: if h.status.eq_ignore_ascii_case("healthy") {
                    HealthState::Healthy
                } else {
                    HealthState::Unhealthy
                },
                provider: h.provider,
                version: h.version,
                model: h.model,
                device: h.device,
            },
            Err(e) => {
                warn!(error = %e, url = %self.base_url, "Sidecar health check failed");
                ProviderHealth::unhealthy(PROVIDER_ID)
            }
        }
    }

    async fn status(&self) -> ProviderStatus {
        match self.get_json::<ProviderStatus>("/tts/status").await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, url = %self.base_url, "Sidecar status check failed");
                ProviderStatus::empty()
            }
        }
    }

    fn model_path(&self, model_size: &str) -> String {
        format!("Qwen/Qwen3-TTS-12Hz-{}-Base", model_size)
    }

    async fn stop(&self) {
        let previous = self
            .client
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if previous.is_some() {
            info!(url = %self.base_url, "Closed sidecar HTTP client");
        } else {
            warn!(url = %self.base_url, "Sidecar provider stopped twice");
        }
    }
}
