//! Error taxonomy shared by every gateway crate.
//!
//! Mirrors the kinds in the design doc, not Rust type names: each variant
//! carries the stable `code` a client sees in `{error: {code, message}}` plus
//! a human-readable message. `child_unreachable` is the one variant the
//! streaming proxy inspects to decide whether to retry.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    // Input errors (4xx)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    // Capacity errors (429)
    #[error("rate limited")]
    RateLimited,

    #[error("too many concurrent inferences")]
    TooManyConcurrent,

    #[error("queue full")]
    QueueFull,

    // Resource errors (503)
    #[error("timed out waiting for model to load")]
    LoadTimeout,

    #[error("no free port available for child process")]
    PortExhaustion,

    #[error("insufficient memory to load model")]
    InsufficientMemory,

    // Child errors (502/500)
    #[error("child process unreachable: {0}")]
    ChildUnreachable(String),

    #[error("child process crashed: {0}")]
    ChildCrashed(String),

    #[error("context window exceeded")]
    ContextOverflow,

    // Integrity errors
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("transfer truncated: got {got} of {expected} bytes")]
    TruncatedTransfer { got: u64, expected: u64 },

    // Fatal
    #[error("shutting down")]
    Shutdown,

    // Escape hatch for I/O and other infrastructure failures that don't fit
    // the taxonomy above but still need a code and message.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code surfaced in `{error: {code, ...}}`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::ModelNotFound(_) => "model_not_found",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::RateLimited => "rate_limited",
            Error::TooManyConcurrent => "too_many_concurrent",
            Error::QueueFull => "queue_full",
            Error::LoadTimeout => "load_timeout",
            Error::PortExhaustion => "port_exhaustion",
            Error::InsufficientMemory => "insufficient_memory",
            Error::ChildUnreachable(_) => "child_unreachable",
            Error::ChildCrashed(_) => "child_crashed",
            Error::ContextOverflow => "context_overflow",
            Error::HashMismatch { .. } => "hash_mismatch",
            Error::TruncatedTransfer { .. } => "truncated_transfer",
            Error::Shutdown => "shutdown",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether a streaming request that saw zero tokens should retry once
    /// after this error (spec.md §4.5, §9 open question 3).
    pub fn is_retryable_cold_start(&self) -> bool {
        matches!(self, Error::ChildUnreachable(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::ChildUnreachable(err.to_string())
        } else {
            Error::Internal(err.to_string())
        }
    }
}
