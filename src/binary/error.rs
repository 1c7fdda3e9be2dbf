use thiserror::Error;

#[derive(Debug, Error)]
pub enum BinaryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Truncated message: ran out of bytes while decoding")]
    TruncatedMessage,
    #[error("Byte {0} does not name a dictionary token")]
    InvalidDictionaryIndex(u8),
    #[error("Invalid node format")]
    InvalidNode,
    #[error("Node has {0} attributes, the descriptor byte carries at most 127")]
    TooManyAttrs(usize),
    #[error("Node has {0} children, the child-count byte carries at most 127")]
    TooManyChildren(usize),
    #[error("String of {0} bytes exceeds the 16-bit length prefix")]
    StringTooLong(usize),
    #[error("Data is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Leftover data after decoding: {0} bytes")]
    LeftoverData(usize),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
