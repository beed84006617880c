//! Backend-agnostic data model: voice prompts, generation requests and the
//! health/status snapshots reported by providers.

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};

/// Model size used until a caller asks for another one.
pub const DEFAULT_MODEL_SIZE: &str = "1.7B";

/// Which backend family produced a [`VoicePrompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptOrigin {
    InProcess,
    Remote,
    #[serde(rename = "replicate")]
    Cloud,
}

/// A reusable bundle of reference audio and transcript.
///
/// Reference audio and its MIME type travel together: a prompt carrying one
/// without the other is rejected by [`VoicePrompt::validate`]. Prompts are
/// immutable once built. A prompt from one backend family is not guaranteed to
/// work with another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoicePrompt {
    #[serde(
        rename = "audio_base64",
        default,
        with = "base64_audio",
        skip_serializing_if = "Option::is_none"
    )]
    audio: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_mime_type: Option<String>,
    #[serde(default)]
    reference_text: String,
    #[serde(rename = "backend", default, skip_serializing_if = "Option::is_none")]
    origin: Option<PromptOrigin>,
    /// Backend-specific state kept verbatim (e.g. the sidecar's prompt object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

impl VoicePrompt {
    pub fn new(
        audio: Vec<u8>,
        mime_type: impl Into<String>,
        reference_text: impl Into<String>,
        origin: PromptOrigin,
    ) -> Self {
        Self {
            audio: Some(audio),
            audio_mime_type: Some(mime_type.into()),
            reference_text: reference_text.into(),
            origin: Some(origin),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Raw reference audio, `None` when absent or empty.
    pub fn audio(&self) -> Option<&[u8]> {
        self.audio.as_deref().filter(|a| !a.is_empty())
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.audio_mime_type.as_deref()
    }

    pub fn reference_text(&self) -> &str {
        &self.reference_text
    }

    pub fn origin(&self) -> Option<PromptOrigin> {
        self.origin
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Checks that reference audio is present and paired with a MIME type.
    pub fn validate(&self) -> Result<()> {
        match (self.audio(), self.mime_type()) {
            (Some(_), Some(mime)) if !mime.is_empty() => Ok(()),
            (Some(_), _) => Err(ProviderError::InvalidInput(
                "voice prompt has reference audio but no MIME type".into(),
            )),
            (None, _) => Err(ProviderError::InvalidInput(
                "reference audio is required for voice cloning".into(),
            )),
        }
    }
}

/// Several reference voices merged into one waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedVoicePrompt {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Input transcripts joined with single spaces, in input order.
    pub reference_text: String,
}

/// Mono PCM produced by a generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl GeneratedAudio {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Arguments of a single `generate` call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    pub voice_prompt: VoicePrompt,
    pub language: String,
    pub seed: Option<u64>,
    pub instruct: Option<String>,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>, voice_prompt: VoicePrompt) -> Self {
        Self {
            text: text.into(),
            voice_prompt,
            language: "en".to_string(),
            seed: None,
            instruct: None,
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn instruct(mut self, instruct: impl Into<String>) -> Self {
        self.instruct = Some(instruct.into());
        self
    }

    /// Rejects requests whose voice prompt carries no usable audio.
    pub fn validate(&self) -> Result<()> {
        self.voice_prompt.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Liveness snapshot, produced fresh on every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub status: HealthState,
    pub provider: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

impl ProviderHealth {
    pub fn unhealthy(provider: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            provider: provider.into(),
            version: None,
            model: None,
            device: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Resource snapshot, produced fresh on every query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub model_loaded: bool,
    #[serde(default)]
    pub model_size: Option<String>,
    #[serde(default)]
    pub available_sizes: Vec<String>,
    #[serde(default)]
    pub gpu_available: Option<bool>,
    #[serde(default)]
    pub vram_used_mb: Option<u64>,
}

impl ProviderStatus {
    pub fn empty() -> Self {
        Self::default()
    }
}

mod base64_audio {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(audio: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match audio {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(d)?;
        match encoded {
            Some(text) => STANDARD
                .decode(text.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
