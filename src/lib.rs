pub mod audio;
pub mod config_loader;
pub mod error;
pub mod providers;
pub mod selector;
pub mod types;

pub use error::{ErrorKind, ProviderError, Result};
pub use providers::TtsProvider;
pub use selector::{build_provider, select_backend, BackendType, EnvSnapshot};
