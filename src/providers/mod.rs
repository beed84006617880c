pub mod cloud;
pub mod in_process;
pub mod remote;

pub use cloud::{CloudProvider, CloudTranscriber};
pub use in_process::{InProcessProvider, LocalRuntime, RuntimeFactory, RuntimeKind};
pub use remote::RemoteProcessProvider;

use crate::error::Result;
use crate::types::{
    CombinedVoicePrompt, GeneratedAudio, GenerationRequest, ProviderHealth, ProviderStatus,
    VoicePrompt,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Contract every TTS execution backend implements.
///
/// Every method is mandatory. Backends with nothing to do for an operation
/// implement it as an explicit no-op.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Short identifier of the backend family (e.g. "local", "replicate").
    fn id(&self) -> &'static str;

    /// Prepares the backend to serve requests at `model_size`.
    /// Idempotent when already loaded at that size.
    async fn load_model(&self, model_size: &str) -> Result<()>;

    /// Releases backend resources. Safe to call when nothing is loaded.
    async fn unload_model(&self) -> Result<()>;

    /// Best-effort liveness. Backends without local state answer optimistically.
    fn is_loaded(&self) -> bool;

    /// Builds a reusable voice prompt. `use_cache` is a hint: backends without a
    /// cache accept it and report `was_cached = false`.
    async fn create_voice_prompt(
        &self,
        audio_path: &Path,
        reference_text: &str,
        use_cache: bool,
    ) -> Result<(VoicePrompt, bool)>;

    /// Merges several reference voices. The two lists must have equal length.
    async fn combine_voice_prompts(
        &self,
        audio_paths: &[PathBuf],
        reference_texts: &[String],
    ) -> Result<CombinedVoicePrompt>;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAudio>;

    /// Never fails: an unreachable backend reports itself unhealthy.
    async fn health(&self) -> ProviderHealth;

    /// Never fails: an unreachable backend reports an empty status.
    async fn status(&self) -> ProviderStatus;

    /// Loadable or human-readable identifier for a model size.
    fn model_path(&self, model_size: &str) -> String;

    /// Releases long-lived connections. Call once during shutdown.
    async fn stop(&self);
}
