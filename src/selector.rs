//! Chooses which provider to run from an environment snapshot.

use crate::config_loader::Settings;
use crate::error::{ProviderError, Result};
use crate::providers::cloud::{CloudProvider, CloudSettings};
use crate::providers::{
    InProcessProvider, RemoteProcessProvider, RuntimeFactory, RuntimeKind, TtsProvider,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Explicit backend override.
pub const BACKEND_OVERRIDE_VAR: &str = "TTS_BACKEND";
/// Cloud credential variables, in lookup order.
pub const CLOUD_TOKEN_VARS: [&str; 2] = ["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-process accelerator runtime.
    Mlx,
    /// In-process portable runtime.
    Pytorch,
    /// Hosted inference API.
    Replicate,
}

impl BackendType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::Mlx => "mlx",
            BackendType::Pytorch => "pytorch",
            BackendType::Replicate => "replicate",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mlx" => Ok(BackendType::Mlx),
            "pytorch" => Ok(BackendType::Pytorch),
            "replicate" => Ok(BackendType::Replicate),
            other => Err(ProviderError::Config(format!(
                "unsupported backend type: {}",
                other
            ))),
        }
    }
}

/// First non-empty credential among [`CLOUD_TOKEN_VARS`].
pub fn cloud_api_token(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    CLOUD_TOKEN_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .find(|v| !v.is_empty())
}

pub fn cloud_api_token_from_env() -> Option<String> {
    cloud_api_token(|name| std::env::var(name).ok())
}

/// Everything the selector looks at, captured once.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub backend_override: Option<String>,
    pub has_cloud_credential: bool,
    pub os: String,
    pub arch: String,
    /// Whether the accelerator runtime is linked into this build.
    pub accelerator_runtime: bool,
}

impl EnvSnapshot {
    pub fn capture(factory: &dyn RuntimeFactory) -> Self {
        Self {
            backend_override: std::env::var(BACKEND_OVERRIDE_VAR).ok(),
            has_cloud_credential: cloud_api_token_from_env().is_some(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            accelerator_runtime: factory.supports(RuntimeKind::Accelerator),
        }
    }

    pub fn is_apple_silicon(&self) -> bool {
        self.os == "macos" && self.arch == "aarch64"
    }
}

/// Override, then credentials, then host capability. Unrecognized overrides
/// fall through to auto-detection.
pub fn select_backend(env: &EnvSnapshot) -> BackendType {
    if let Some(backend) = env
        .backend_override
        .as_deref()
        .and_then(|v| v.parse::<BackendType>().ok())
    {
        return backend;
    }
    if env.has_cloud_credential {
        return BackendType::Replicate;
    }
    if env.is_apple_silicon() && env.accelerator_runtime {
        return BackendType::Mlx;
    }
    BackendType::Pytorch
}

/// Constructs the chosen provider. The caller owns the returned handle.
pub fn build_provider(
    backend: BackendType,
    settings: &Settings,
    factory: Arc<dyn RuntimeFactory>,
) -> Result<Arc<dyn TtsProvider>> {
    info!(backend = %backend, "Starting TTS provider");
    let provider: Arc<dyn TtsProvider> = match backend {
        BackendType::Mlx => Arc::new(InProcessProvider::new(RuntimeKind::Accelerator, factory)),
        BackendType::Pytorch => Arc::new(InProcessProvider::new(RuntimeKind::Portable, factory)),
        BackendType::Replicate => Arc::new(CloudProvider::new(CloudSettings::from(settings))?),
    };
    Ok(provider)
}

/// Provider for a sidecar at `settings.provider_url`, if one is configured.
pub fn build_remote_provider(settings: &Settings) -> Result<Option<Arc<RemoteProcessProvider>>> {
    match settings.provider_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => {
            info!(url, "Using sidecar provider");
            let provider = RemoteProcessProvider::new(url, settings.provider_timeout())?;
            Ok(Some(Arc::new(provider)))
        }
        None => Ok(None),
    }
}
