//! Error codes for the child engine client (spec.md §4.1).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("context window exceeded")]
    ContextOverflow,

    #[error("child process unreachable: {0}")]
    ChildUnreachable(String),

    #[error("child process crashed: {0}")]
    ChildCrashed(String),

    #[error("malformed response from child: {0}")]
    InvalidResponse(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::ModelNotLoaded => "model_not_loaded",
            EngineError::ContextOverflow => "context_overflow",
            EngineError::ChildUnreachable(_) => "child_unreachable",
            EngineError::ChildCrashed(_) => "child_crashed",
            EngineError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Network EOF, connection-refused, and connection-reset on a cold request
/// are coded `child_unreachable` so C5's retry rule can key off it.
impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            EngineError::ChildUnreachable(err.to_string())
        } else {
            EngineError::InvalidResponse(err.to_string())
        }
    }
}

impl From<EngineError> for gateway_core::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ModelNotLoaded => gateway_core::Error::ModelNotFound("not loaded".into()),
            EngineError::ContextOverflow => gateway_core::Error::ContextOverflow,
            EngineError::ChildUnreachable(msg) => gateway_core::Error::ChildUnreachable(msg),
            EngineError::ChildCrashed(msg) => gateway_core::Error::ChildCrashed(msg),
            EngineError::InvalidResponse(msg) => gateway_core::Error::Internal(msg),
        }
    }
}
