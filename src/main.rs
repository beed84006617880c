//! voicebox-providers - command-line front end for the TTS provider layer
//!
//! Picks a backend the same way the application does and drives it directly.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voicebox_providers::audio;
use voicebox_providers::config_loader::Settings;
use voicebox_providers::error::{ProviderError, Result as ProviderResult};
use voicebox_providers::providers::cloud::{CloudSettings, CloudTranscriber};
use voicebox_providers::providers::{LocalRuntime, RuntimeFactory, RuntimeKind, TtsProvider};
use voicebox_providers::selector::{self, EnvSnapshot};
use voicebox_providers::types::{GenerationRequest, VoicePrompt};

/// Drive a TTS backend from the command line
#[derive(Parser)]
#[command(name = "voicebox-providers")]
#[command(version)]
#[command(about = "Voice cloning and speech generation through pluggable backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which backend would be selected
    Backend,

    /// Check backend health
    Health,

    /// Show backend resource status
    Status,

    /// Create a voice prompt from a reference clip
    Clone {
        /// Reference audio file
        #[arg(short, long)]
        audio: PathBuf,
        /// Transcript of the reference audio
        #[arg(short, long)]
        text: String,
        /// Where to write the prompt (JSON)
        #[arg(short, long, default_value = "voice_prompt.json")]
        out: PathBuf,
        /// Skip the backend's prompt cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Generate speech in a cloned voice
    Generate {
        /// Text to speak
        #[arg(short, long)]
        text: String,
        /// Voice prompt created with `clone`
        #[arg(short, long)]
        prompt: PathBuf,
        /// Output WAV file
        #[arg(short, long, default_value = "output.wav")]
        out: PathBuf,
        /// Language code (defaults to the configured language)
        #[arg(short, long)]
        language: Option<String>,
        /// Seed for reproducible output
        #[arg(short, long)]
        seed: Option<u64>,
        /// Model size (e.g., 1.7B, 0.6B)
        #[arg(short, long)]
        model_size: Option<String>,
        /// Style instruction
        #[arg(short, long)]
        instruct: Option<String>,
    },

    /// Merge several reference clips into one
    Combine {
        /// Reference audio file (repeatable)
        #[arg(short, long = "audio", required = true)]
        audio: Vec<PathBuf>,
        /// Transcript for each clip, in the same order (repeatable)
        #[arg(short, long = "text", required = true)]
        text: Vec<String>,
        /// Output WAV file
        #[arg(short, long, default_value = "combined.wav")]
        out: PathBuf,
    },

    /// Transcribe audio through the hosted Whisper model
    Transcribe {
        /// Audio file
        #[arg(short, long)]
        audio: PathBuf,
        /// Language hint
        #[arg(short, long)]
        language: Option<String>,
    },
}

/// No neural runtime is linked into this binary.
struct UnlinkedRuntimes;

impl RuntimeFactory for UnlinkedRuntimes {
    fn supports(&self, _kind: RuntimeKind) -> bool {
        false
    }

    fn create(&self, kind: RuntimeKind) -> ProviderResult<Arc<dyn LocalRuntime>> {
        Err(ProviderError::Config(format!(
            "the {} runtime is not available in this build; \
             set VOICEBOX_PROVIDER_URL or a Replicate token",
            kind.provider_name()
        )))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::new()?;
    let factory: Arc<dyn RuntimeFactory> = Arc::new(UnlinkedRuntimes);
    let env = EnvSnapshot::capture(factory.as_ref());

    match cli.command {
        Commands::Backend => {
            let backend = selector::select_backend(&env);
            println!("Backend Selection");
            println!("─────────────────");
            println!("Selected:     {}", backend);
            println!(
                "Override:     {}",
                env.backend_override.as_deref().unwrap_or("(none)")
            );
            println!(
                "Cloud token:  {}",
                if env.has_cloud_credential { "Yes" } else { "No" }
            );
            println!("Platform:     {}/{}", env.os, env.arch);
            if let Some(url) = settings.provider_url.as_deref() {
                println!("Sidecar:      {}", url);
            }
            return Ok(());
        }
        Commands::Transcribe { audio, language } => {
            let transcriber = CloudTranscriber::new(&CloudSettings::from(&settings))?;
            let text = transcriber.transcribe(&audio, language.as_deref()).await?;
            println!("{}", text);
            return Ok(());
        }
        command => {
            let provider: Arc<dyn TtsProvider> = match selector::build_remote_provider(&settings)? {
                Some(remote) => remote as Arc<dyn TtsProvider>,
                None => selector::build_provider(
                    selector::select_backend(&env),
                    &settings,
                    factory.clone(),
                )?,
            };

            let result = run(provider.as_ref(), &settings, command).await;
            provider.stop().await;
            result?;
        }
    }

    Ok(())
}

async fn run(
    provider: &dyn TtsProvider,
    settings: &Settings,
    command: Commands,
) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Health => {
            let health = provider.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.is_healthy() {
                warn!(provider = %health.provider, "Backend is unhealthy");
            }
        }

        Commands::Status => {
            let status = provider.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Clone {
            audio,
            text,
            out,
            no_cache,
        } => {
            let (prompt, was_cached) = provider
                .create_voice_prompt(&audio, &text, !no_cache)
                .await?;
            tokio::fs::write(&out, serde_json::to_vec_pretty(&prompt)?).await?;
            println!(
                "Voice prompt written to {}{}",
                out.display(),
                if was_cached { " (cached)" } else { "" }
            );
        }

        Commands::Generate {
            text,
            prompt,
            out,
            language,
            seed,
            model_size,
            instruct,
        } => {
            let prompt: VoicePrompt = serde_json::from_slice(&tokio::fs::read(&prompt).await?)?;
            let size = model_size.unwrap_or_else(|| settings.default_model_size.clone());
            provider.load_model(&size).await?;

            let mut request = GenerationRequest::new(text, prompt)
                .language(language.unwrap_or_else(|| settings.default_language.clone()));
            if let Some(seed) = seed {
                request = request.seed(seed);
            }
            if let Some(instruct) = instruct {
                request = request.instruct(instruct);
            }

            let generated = provider.generate(&request).await?;
            audio::write_wav(&out, &generated.samples, generated.sample_rate).await?;
            info!(
                path = %out.display(),
                secs = generated.duration_secs(),
                "Wrote generated audio"
            );
            println!("Generated {:.1}s of audio: {}", generated.duration_secs(), out.display());
        }

        Commands::Combine { audio, text, out } => {
            let combined = provider.combine_voice_prompts(&audio, &text).await?;
            audio::write_wav(&out, &combined.samples, combined.sample_rate).await?;
            println!("Combined reference written to {}", out.display());
            println!("Reference text: {}", combined.reference_text);
        }

        Commands::Backend | Commands::Transcribe { .. } => {}
    }

    Ok(())
}
