use aes_gcm::aead::KeyInit;
use aes_gcm::Aes256Gcm;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcmError {
    #[error("Invalid key size for AES-256-GCM")]
    InvalidSize,
    #[error("AES-GCM cipher operation failed")]
    CipherError,
}

pub type Result<T> = std::result::Result<T, GcmError>;

/// Prepares an AES-256-GCM cipher instance from a 32-byte secret key.
pub fn prepare(secret_key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(secret_key).map_err(|_| GcmError::InvalidSize)
}

/// Builds the 12-byte nonce used throughout the protocol: eight zero bytes
/// followed by the big-endian counter.
pub fn generate_iv(counter: u32) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[8..].copy_from_slice(&counter.to_be_bytes());
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iv_layout() {
        assert_eq!(generate_iv(0), [0u8; 12]);
        assert_eq!(
            generate_iv(0x01020304),
            [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_prepare_rejects_short_key() {
        assert!(prepare(&[0u8; 16]).is_err());
        assert!(prepare(&[0u8; 32]).is_ok());
    }
}
