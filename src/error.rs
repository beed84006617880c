//! Error taxonomy shared by every provider.

/// Coarse classification used by callers to decide whether to retry,
/// reconfigure, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing/invalid credential or unsupported configuration.
    Configuration,
    /// Bad caller input, rejected before any I/O.
    InvalidInput,
    /// Timeout, refused connection or non-2xx reply.
    Transport,
    /// The backend answered but the answer is unusable.
    Upstream,
    /// Local failures (file I/O, audio decoding, worker crashes).
    Internal,
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("{backend} returned an unusable response: {message}")]
    Upstream {
        backend: &'static str,
        message: String,
    },

    #[error("no model is loaded")]
    ModelNotLoaded,

    #[error("provider has been stopped")]
    Stopped,

    #[error("local runtime error: {0}")]
    Runtime(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("wav codec error")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("background worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::InvalidInput(_) | Self::ModelNotLoaded | Self::Stopped => {
                ErrorKind::InvalidInput
            }
            Self::Transport { .. } | Self::HttpStatus { .. } | Self::Timeout { .. } => {
                ErrorKind::Transport
            }
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Runtime(_) | Self::Audio(_) | Self::Wav(_) | Self::Io(_) | Self::Worker(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True for failures a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    pub(crate) fn transport(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }

    pub(crate) fn upstream(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            backend,
            message: message.into(),
        }
    }
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            ProviderError::Config("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ProviderError::InvalidInput("x".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            ProviderError::upstream("replicate", "no url").kind(),
            ErrorKind::Upstream
        );
        let status = ProviderError::HttpStatus {
            endpoint: "http://localhost/tts/generate".into(),
            status: 503,
            body: String::new(),
        };
        assert!(status.is_transient());
        assert!(!ProviderError::ModelNotLoaded.is_transient());
    }

    #[test]
    fn test_display_keeps_context() {
        let err = ProviderError::HttpStatus {
            endpoint: "http://localhost:8000/tts/generate".into(),
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "http://localhost:8000/tts/generate returned HTTP 500: boom"
        );
    }
}
