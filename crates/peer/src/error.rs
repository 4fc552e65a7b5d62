use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeerError>;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer not found: {0}")]
    NotFound(String),

    #[error("invalid artifact filename: {0}")]
    InvalidFilename(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("transfer truncated: got {got} of {expected} bytes")]
    Truncated { got: u64, expected: u64 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PeerError> for gateway_core::Error {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::NotFound(id) => gateway_core::Error::InvalidRequest(format!("peer not found: {id}")),
            PeerError::InvalidFilename(name) => gateway_core::Error::InvalidRequest(format!("invalid filename: {name}")),
            PeerError::HashMismatch { expected, actual } => gateway_core::Error::HashMismatch { expected, actual },
            PeerError::Truncated { got, expected } => gateway_core::Error::TruncatedTransfer { got, expected },
            PeerError::Http(e) => gateway_core::Error::ChildUnreachable(e.to_string()),
            PeerError::Io(e) => gateway_core::Error::Internal(e.to_string()),
        }
    }
}
