use thiserror::Error;

/// Classification of an inference-service failure.
///
/// Drives the retry policy: transient kinds are retried with backoff,
/// fatal kinds abort the affected task immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Request timed out
    Timeout,
    /// Rate limit hit (HTTP 429 or provider equivalent)
    RateLimited,
    /// Provider-side failure (5xx)
    ServerError,
    /// Response did not match the expected structured schema
    MalformedOutput,
    /// Authentication or API-key failure
    Auth,
    /// Quota or billing block
    QuotaExhausted,
    /// Request rejected as invalid (unsupported region, bad parameters)
    InvalidRequest,
}

impl ServiceErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ServiceErrorKind::Timeout
                | ServiceErrorKind::RateLimited
                | ServiceErrorKind::ServerError
                | ServiceErrorKind::MalformedOutput
        )
    }
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::RateLimited => "rate limited",
            ServiceErrorKind::ServerError => "server error",
            ServiceErrorKind::MalformedOutput => "malformed output",
            ServiceErrorKind::Auth => "authentication failed",
            ServiceErrorKind::QuotaExhausted => "quota exhausted",
            ServiceErrorKind::InvalidRequest => "invalid request",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("run cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("inference service error ({kind}): {message}")]
    Service {
        kind: ServiceErrorKind,
        message: String,
    },
    #[error("transcription failed: {0}")]
    Transcribe(String),
    #[error("background task failed: {0}")]
    Join(String),
}

impl PipelineError {
    /// Shorthand for a classified service error.
    pub fn service(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        PipelineError::Service {
            kind,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Whether the retry wrapper should attempt this operation again.
    ///
    /// Cancellation is not an application error and is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Service { kind, .. } => kind.is_retryable(),
            PipelineError::Transcribe(_) => true,
            _ => false,
        }
    }
}
