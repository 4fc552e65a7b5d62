use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("model {0} is currently loaded, refusing to delete")]
    ModelInUse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for gateway_core::Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => gateway_core::Error::ModelNotFound(id),
            RegistryError::ModelInUse(id) => {
                gateway_core::Error::InvalidRequest(format!("model {id} is in use"))
            }
            RegistryError::Io(e) => gateway_core::Error::Internal(e.to_string()),
        }
    }
}
