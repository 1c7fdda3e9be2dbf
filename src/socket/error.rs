use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Socket is closed")]
    SocketClosed,
    #[error("Nonce counter exhausted; connection must be re-established")]
    NonceOverflow,
    #[error("Crypto operation failed: {0}")]
    Crypto(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SocketError>;
