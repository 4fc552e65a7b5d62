use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("timed out waiting for model to load")]
    LoadTimeout,

    #[error("no free port available for child process")]
    PortExhaustion,

    #[error("child process crashed: {0}")]
    ChildCrashed(String),

    #[error("child process unreachable: {0}")]
    ChildUnreachable(String),

    #[error("model not found: {0}")]
    NotFound(String),

    #[error("cache is shutting down")]
    Shutdown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CacheError> for gateway_core::Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::LoadTimeout => gateway_core::Error::LoadTimeout,
            CacheError::PortExhaustion => gateway_core::Error::PortExhaustion,
            CacheError::ChildCrashed(m) => gateway_core::Error::ChildCrashed(m),
            CacheError::ChildUnreachable(m) => gateway_core::Error::ChildUnreachable(m),
            CacheError::NotFound(id) => gateway_core::Error::ModelNotFound(id),
            CacheError::Shutdown => gateway_core::Error::Shutdown,
            CacheError::Io(e) => gateway_core::Error::Internal(e.to_string()),
        }
    }
}
