use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use voicebox_providers::providers::{
    InProcessProvider, LocalRuntime, RuntimeFactory, RuntimeKind, TtsProvider,
};
use voicebox_providers::types::{GeneratedAudio, GenerationRequest, PromptOrigin, VoicePrompt};
use voicebox_providers::{ProviderError, Result};

/// Counts how many `generate` calls overlap.
#[derive(Default)]
struct CountingRuntime {
    loaded: AtomicBool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

#[async_trait]
impl LocalRuntime for CountingRuntime {
    async fn load_model(&self, _model_size: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload_model(&self) -> Result<()> {
        // Unloading mid-generation would corrupt the output.
        assert_eq!(self.in_flight.load(Ordering::SeqCst), 0);
        self.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn current_model_size(&self) -> Option<String> {
        Some("0.6B".to_string())
    }

    async fn create_voice_prompt(
        &self,
        _audio_path: &Path,
        reference_text: &str,
        _use_cache: bool,
    ) -> Result<(VoicePrompt, bool)> {
        Ok((
            VoicePrompt::new(vec![0; 8], "audio/wav", reference_text, PromptOrigin::InProcess),
            false,
        ))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAudio> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedAudio {
            samples: vec![0.0; request.text.len()],
            sample_rate: 24000,
        })
    }

    fn model_path(&self, model_size: &str) -> String {
        format!("/models/{}", model_size)
    }
}

struct SharedFactory(Arc<CountingRuntime>);

impl RuntimeFactory for SharedFactory {
    fn supports(&self, kind: RuntimeKind) -> bool {
        kind == RuntimeKind::Portable
    }

    fn create(&self, _kind: RuntimeKind) -> Result<Arc<dyn LocalRuntime>> {
        Ok(self.0.clone())
    }
}

fn request(i: usize) -> GenerationRequest {
    let prompt = VoicePrompt::new(vec![1; 16], "audio/wav", "ref", PromptOrigin::InProcess);
    GenerationRequest::new(format!("Sentence number {}", i), prompt).seed(i as u64)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_generation_is_serialized() {
    let runtime = Arc::new(CountingRuntime::default());
    let provider = Arc::new(InProcessProvider::new(
        RuntimeKind::Portable,
        Arc::new(SharedFactory(runtime.clone())),
    ));
    provider.load_model("0.6B").await.unwrap();

    println!("Flooding provider with 200 generate calls...");
    let start = std::time::Instant::now();
    let mut handles = Vec::new();
    for i in 0..200 {
        let provider = provider.clone();
        handles.push(tokio::spawn(async move { provider.generate(&request(i)).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    println!("Flood complete in {:?}", start.elapsed());

    assert_eq!(runtime.completed.load(Ordering::SeqCst), 200);
    assert_eq!(runtime.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unload_races_with_generation() {
    let runtime = Arc::new(CountingRuntime::default());
    let provider = Arc::new(InProcessProvider::new(
        RuntimeKind::Portable,
        Arc::new(SharedFactory(runtime.clone())),
    ));

    let mut handles = Vec::new();
    for i in 0..100 {
        let provider = provider.clone();
        handles.push(tokio::spawn(async move {
            match i % 10 {
                0 => provider.load_model("0.6B").await.map(|_| ()),
                5 => provider.unload_model().await,
                _ => provider.generate(&request(i)).await.map(|_| ()),
            }
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) | Err(ProviderError::ModelNotLoaded) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(runtime.in_flight.load(Ordering::SeqCst), 0);
    assert!(runtime.peak.load(Ordering::SeqCst) <= 1);
}
