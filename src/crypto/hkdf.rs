use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("Requested HKDF output length is out of range")]
    InvalidLength,
}

/// HKDF-SHA256 extract-and-expand. The Noise engine always asks for 64
/// bytes (a chaining-key / AEAD-key pair) with an empty info string.
pub fn sha256(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, HkdfError> {
    let kdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; length];
    kdf.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidLength)?;
    Ok(okm)
}
