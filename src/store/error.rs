use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Credential serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
