//! Provider that runs the synthesis runtime inside this process.

use super::TtsProvider;
use crate::audio::{self, CombineMode};
use crate::error::{ProviderError, Result};
use crate::types::{
    CombinedVoicePrompt, GeneratedAudio, GenerationRequest, HealthState, ProviderHealth,
    ProviderStatus, VoicePrompt,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{info, warn};

/// Which local runtime flavour is linked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Metal-backed runtime for Apple Silicon.
    Accelerator,
    /// CPU/CUDA runtime that runs anywhere.
    Portable,
}

impl RuntimeKind {
    pub fn provider_name(self) -> &'static str {
        match self {
            RuntimeKind::Accelerator => "apple-mlx",
            RuntimeKind::Portable => "pytorch-cpu",
        }
    }

    pub fn available_sizes(self) -> Vec<String> {
        match self {
            RuntimeKind::Accelerator => vec!["1.7B".to_string()],
            RuntimeKind::Portable => vec!["1.7B".to_string(), "0.6B".to_string()],
        }
    }
}

/// The neural synthesis runtime. Implemented outside this crate.
#[async_trait]
pub trait LocalRuntime: Send + Sync {
    async fn load_model(&self, model_size: &str) -> Result<()>;

    async fn unload_model(&self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    fn current_model_size(&self) -> Option<String>;

    async fn create_voice_prompt(
        &self,
        audio_path: &Path,
        reference_text: &str,
        use_cache: bool,
    ) -> Result<(VoicePrompt, bool)>;

    async fn combine_voice_prompts(
        &self,
        audio_paths: &[PathBuf],
        reference_texts: &[String],
    ) -> Result<CombinedVoicePrompt> {
        audio::combine_files(audio_paths, reference_texts, CombineMode::Resample).await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAudio>;

    fn model_path(&self, model_size: &str) -> String;

    fn device(&self) -> Option<String> {
        None
    }

    fn gpu_available(&self) -> bool {
        false
    }

    /// Memory currently allocated on the accelerator, read from its API.
    fn vram_allocated_bytes(&self) -> Option<u64> {
        None
    }

    /// Whether overlapping `generate` calls are safe.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Builds local runtimes on demand.
pub trait RuntimeFactory: Send + Sync {
    fn supports(&self, kind: RuntimeKind) -> bool;

    fn create(&self, kind: RuntimeKind) -> Result<Arc<dyn LocalRuntime>>;
}

pub struct InProcessProvider {
    kind: RuntimeKind,
    factory: Arc<dyn RuntimeFactory>,
    runtime: OnceCell<Arc<dyn LocalRuntime>>,
    /// Write side for load/unload, read side for generation.
    transitions: RwLock<()>,
    /// Single-flight gate for non-reentrant runtimes.
    generation: Mutex<()>,
}

impl InProcessProvider {
    pub fn new(kind: RuntimeKind, factory: Arc<dyn RuntimeFactory>) -> Self {
        Self {
            kind,
            factory,
            runtime: OnceCell::new(),
            transitions: RwLock::new(()),
            generation: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    async fn runtime(&self) -> Result<&Arc<dyn LocalRuntime>> {
        self.runtime
            .get_or_try_init(|| async {
                info!(runtime = self.kind.provider_name(), "Constructing local runtime");
                self.factory.create(self.kind)
            })
            .await
    }

    fn loaded_size(runtime: &dyn LocalRuntime) -> Option<String> {
        if runtime.is_loaded() {
            runtime.current_model_size()
        } else {
            None
        }
    }
}

#[async_trait]
impl TtsProvider for InProcessProvider {
    fn id(&self) -> &'static str {
        self.kind.provider_name()
    }

    async fn load_model(&self, model_size: &str) -> Result<()> {
        let runtime = self.runtime().await?;
        let _transition = self.transitions.write().await;
        if Self::loaded_size(runtime.as_ref()).as_deref() == Some(model_size) {
            return Ok(());
        }
        info!(model_size, "Loading local model");
        runtime.load_model(model_size).await
    }

    async fn unload_model(&self) -> Result<()> {
        let Some(runtime) = self.runtime.get() else {
            return Ok(());
        };
        let _transition = self.transitions.write().await;
        if !runtime.is_loaded() {
            return Ok(());
        }
        info!("Unloading local model");
        runtime.unload_model().await
    }

    fn is_loaded(&self) -> bool {
        self.runtime.get().is_some_and(|r| r.is_loaded())
    }

    async fn create_voice_prompt(
        &self,
        audio_path: &Path,
        reference_text: &str,
        use_cache: bool,
    ) -> Result<(VoicePrompt, bool)> {
        self.runtime()
            .await?
            .create_voice_prompt(audio_path, reference_text, use_cache)
            .await
    }

    async fn combine_voice_prompts(
        &self,
        audio_paths: &[PathBuf],
        reference_texts: &[String],
    ) -> Result<CombinedVoicePrompt> {
        self.runtime()
            .await?
            .combine_voice_prompts(audio_paths, reference_texts)
            .await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAudio> {
        request.validate()?;
        let runtime = self.runtime().await?;
        let _transition = self.transitions.read().await;
        let _single_flight = if runtime.is_reentrant() {
            None
        } else {
            Some(self.generation.lock().await)
        };
        if !runtime.is_loaded() {
            return Err(ProviderError::ModelNotLoaded);
        }
        runtime.generate(request).await
    }

    async fn health(&self) -> ProviderHealth {
        let runtime = match self.runtime().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Local runtime unavailable");
                return ProviderHealth::unhealthy(self.kind.provider_name());
            }
        };
        let device = match self.kind {
            RuntimeKind::Accelerator => Some("metal".to_string()),
            RuntimeKind::Portable => runtime.device(),
        };
        ProviderHealth {
            status: HealthState::Healthy,
            provider: self.kind.provider_name().to_string(),
            version: None,
            model: Self::loaded_size(runtime.as_ref()),
            device,
        }
    }

    async fn status(&self) -> ProviderStatus {
        let runtime = match self.runtime().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Local runtime unavailable");
                return ProviderStatus::empty();
            }
        };

        let (gpu_available, vram_used_mb) = match self.kind {
            RuntimeKind::Accelerator => (None, None),
            RuntimeKind::Portable => {
                let gpu = runtime.gpu_available();
                let vram = if gpu {
                    runtime
                        .vram_allocated_bytes()
                        .map(|b| b / 1024 / 1024)
                        .filter(|mb| *mb > 0)
                } else {
                    None
                };
                (Some(gpu), vram)
            }
        };

        ProviderStatus {
            model_loaded: runtime.is_loaded(),
            model_size: Self::loaded_size(runtime.as_ref()),
            available_sizes: self.kind.available_sizes(),
            gpu_available,
            vram_used_mb,
        }
    }

    fn model_path(&self, model_size: &str) -> String {
        match self.runtime.get() {
            Some(runtime) => runtime.model_path(model_size),
            None => format!("Qwen/Qwen3-TTS-12Hz-{}-Base", model_size),
        }
    }

    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PromptOrigin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRuntime {
        loaded: std::sync::Mutex<Option<String>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        events: std::sync::Mutex<Vec<String>>,
        gpu_bytes: Option<u64>,
        reentrant: bool,
    }

    impl FakeRuntime {
        fn log(&self, event: &str) {
            self.events.lock().unwrap().push(event.to_string());
        }
    }

    #[async_trait]
    impl LocalRuntime for FakeRuntime {
        async fn load_model(&self, model_size: &str) -> Result<()> {
            self.log(&format!("load {}", model_size));
            *self.loaded.lock().unwrap() = Some(model_size.to_string());
            Ok(())
        }

        async fn unload_model(&self) -> Result<()> {
            self.log("unload");
            *self.loaded.lock().unwrap() = None;
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            self.loaded.lock().unwrap().is_some()
        }

        fn current_model_size(&self) -> Option<String> {
            self.loaded.lock().unwrap().clone()
        }

        async fn create_voice_prompt(
            &self,
            _audio_path: &Path,
            reference_text: &str,
            use_cache: bool,
        ) -> Result<(VoicePrompt, bool)> {
            let prompt =
                VoicePrompt::new(vec![1], "audio/wav", reference_text, PromptOrigin::InProcess);
            Ok((prompt, use_cache))
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedAudio> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.log("generate");
            Ok(GeneratedAudio {
                samples: vec![0.0; 240],
                sample_rate: 24000,
            })
        }

        fn model_path(&self, model_size: &str) -> String {
            format!("/models/{}", model_size)
        }

        fn device(&self) -> Option<String> {
            Some(if self.gpu_bytes.is_some() { "cuda" } else { "cpu" }.to_string())
        }

        fn gpu_available(&self) -> bool {
            self.gpu_bytes.is_some()
        }

        fn vram_allocated_bytes(&self) -> Option<u64> {
            self.gpu_bytes
        }

        fn is_reentrant(&self) -> bool {
            self.reentrant
        }
    }

    struct FakeFactory {
        runtime: Option<Arc<FakeRuntime>>,
        created: AtomicUsize,
    }

    impl FakeFactory {
        fn with(runtime: FakeRuntime) -> (Arc<Self>, Arc<FakeRuntime>) {
            let runtime = Arc::new(runtime);
            let factory = Arc::new(Self {
                runtime: Some(runtime.clone()),
                created: AtomicUsize::new(0),
            });
            (factory, runtime)
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                runtime: None,
                created: AtomicUsize::new(0),
            })
        }
    }

    impl RuntimeFactory for FakeFactory {
        fn supports(&self, _kind: RuntimeKind) -> bool {
            self.runtime.is_some()
        }

        fn create(&self, _kind: RuntimeKind) -> Result<Arc<dyn LocalRuntime>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            match &self.runtime {
                Some(r) => Ok(r.clone() as Arc<dyn LocalRuntime>),
                None => Err(ProviderError::Config("runtime not linked".into())),
            }
        }
    }

    fn request() -> GenerationRequest {
        let prompt = VoicePrompt::new(vec![1, 2], "audio/wav", "ref", PromptOrigin::InProcess);
        GenerationRequest::new("hello", prompt)
    }

    #[tokio::test]
    async fn test_status_reports_sizes_per_runtime() {
        let (factory, _) = FakeFactory::with(FakeRuntime::default());
        let accel = InProcessProvider::new(RuntimeKind::Accelerator, factory.clone());
        let status = accel.status().await;
        assert_eq!(status.available_sizes, vec!["1.7B"]);
        assert_eq!(status.gpu_available, None);

        let portable = InProcessProvider::new(RuntimeKind::Portable, factory);
        let status = portable.status().await;
        assert_eq!(status.available_sizes, vec!["1.7B", "0.6B"]);
        assert_eq!(status.gpu_available, Some(false));
        assert_eq!(status.vram_used_mb, None);
    }

    #[tokio::test]
    async fn test_status_reports_vram_in_megabytes() {
        let (factory, _) = FakeFactory::with(FakeRuntime {
            gpu_bytes: Some(512 * 1024 * 1024 + 10),
            ..FakeRuntime::default()
        });
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory);
        provider.load_model("0.6B").await.unwrap();

        let status = provider.status().await;
        assert!(status.model_loaded);
        assert_eq!(status.model_size.as_deref(), Some("0.6B"));
        assert_eq!(status.gpu_available, Some(true));
        assert_eq!(status.vram_used_mb, Some(512));

        let health = provider.health().await;
        assert_eq!(health.provider, "pytorch-cpu");
        assert_eq!(health.device.as_deref(), Some("cuda"));
        assert_eq!(health.model.as_deref(), Some("0.6B"));
    }

    #[tokio::test]
    async fn test_accelerator_health_reports_metal() {
        let (factory, _) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Accelerator, factory);
        let health = provider.health().await;
        assert!(health.is_healthy());
        assert_eq!(health.provider, "apple-mlx");
        assert_eq!(health.device.as_deref(), Some("metal"));
        assert_eq!(health.model, None);
    }

    #[tokio::test]
    async fn test_runtime_is_constructed_once() {
        let (factory, _) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory.clone());
        assert!(!provider.is_loaded());

        let (_, _, loaded) = tokio::join!(
            provider.health(),
            provider.status(),
            provider.load_model("1.7B")
        );
        loaded.unwrap();
        provider.load_model("1.7B").await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(provider.is_loaded());
        assert_eq!(provider.model_path("1.7B"), "/models/1.7B");
    }

    #[tokio::test]
    async fn test_load_is_idempotent_at_same_size() {
        let (factory, runtime) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory);
        provider.load_model("1.7B").await.unwrap();
        provider.load_model("1.7B").await.unwrap();
        provider.load_model("0.6B").await.unwrap();
        assert_eq!(
            *runtime.events.lock().unwrap(),
            vec!["load 1.7B", "load 0.6B"]
        );
    }

    #[tokio::test]
    async fn test_generate_requires_loaded_model() {
        let (factory, _) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory);
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotLoaded));

        provider.load_model("1.7B").await.unwrap();
        let audio = provider.generate(&request()).await.unwrap();
        assert_eq!(audio.sample_rate, 24000);
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_prompt_before_runtime() {
        let (factory, _) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory.clone());
        let empty: VoicePrompt =
            serde_json::from_value(serde_json::json!({"audio_base64": ""})).unwrap();

        let err = provider
            .generate(&GenerationRequest::new("hello", empty))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_reentrant_runtime_is_single_flight() {
        let (factory, runtime) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory);
        provider.load_model("1.7B").await.unwrap();

        let req = request();
        let (a, b, c) = tokio::join!(
            provider.generate(&req),
            provider.generate(&req),
            provider.generate(&req)
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(runtime.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reentrant_runtime_overlaps() {
        let (factory, runtime) = FakeFactory::with(FakeRuntime {
            reentrant: true,
            ..FakeRuntime::default()
        });
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory);
        provider.load_model("1.7B").await.unwrap();

        let req = request();
        let (a, b) = tokio::join!(provider.generate(&req), provider.generate(&req));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(runtime.max_active.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unload_waits_for_inflight_generation() {
        let (factory, runtime) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory);
        provider.load_model("1.7B").await.unwrap();

        let req = request();
        let unload = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            provider.unload_model().await
        };
        let (generated, unloaded) = tokio::join!(provider.generate(&req), unload);
        assert!(generated.is_ok());
        unloaded.unwrap();
        assert_eq!(
            *runtime.events.lock().unwrap(),
            vec!["load 1.7B", "generate", "unload"]
        );

        let err = provider.generate(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotLoaded));
    }

    #[tokio::test]
    async fn test_missing_runtime_degrades_health_and_status() {
        let provider = InProcessProvider::new(RuntimeKind::Portable, FakeFactory::broken());
        let health = provider.health().await;
        assert!(!health.is_healthy());
        assert_eq!(health.provider, "pytorch-cpu");
        assert_eq!(provider.status().await, ProviderStatus::empty());
        assert!(!provider.is_loaded());
        provider.unload_model().await.unwrap();

        let err = provider.load_model("1.7B").await.unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[tokio::test]
    async fn test_create_voice_prompt_forwards_cache_hint() {
        let (factory, _) = FakeFactory::with(FakeRuntime::default());
        let provider = InProcessProvider::new(RuntimeKind::Portable, factory);
        let (prompt, cached) = provider
            .create_voice_prompt(Path::new("ref.wav"), "hi", true)
            .await
            .unwrap();
        assert!(cached);
        assert_eq!(prompt.origin(), Some(PromptOrigin::InProcess));
    }
}
