use aes_gcm::aead::{Aead, Payload};
use aes_gcm::Aes256Gcm;
use sha2::{Digest, Sha256};

use crate::crypto::{gcm, hkdf};
use crate::noise::{HandshakeError, Result};

pub fn sha256_slice(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The Noise symmetric state: transcript hash `h`, chaining key `ck` (salt),
/// the current AEAD key and its nonce counter. Dropped at split time.
pub struct NoiseHandshake {
    hash: [u8; 32],
    salt: [u8; 32],
    key: Aes256Gcm,
    counter: u32,
}

impl NoiseHandshake {
    /// Initialises the state from the protocol name and mixes in the
    /// prologue. A 32-byte name is used verbatim as the initial hash,
    /// otherwise its SHA-256.
    pub fn new(pattern: &str, prologue: &[u8]) -> Result<Self> {
        let h: [u8; 32] = if pattern.len() == 32 {
            pattern.as_bytes().try_into().unwrap()
        } else {
            sha256_slice(pattern.as_bytes())
        };

        let mut state = Self {
            hash: h,
            salt: h,
            key: gcm::prepare(&h).map_err(|e| HandshakeError::Crypto(e.to_string()))?,
            counter: 0,
        };
        state.authenticate(prologue);
        Ok(state)
    }

    /// MixHash: `h <- SHA256(h || data)`. Applied to every cleartext public
    /// key and every handshake ciphertext.
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn post_increment_counter(&mut self) -> u32 {
        let count = self.counter;
        self.counter += 1;
        count
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = gcm::generate_iv(self.post_increment_counter());
        let payload = Payload {
            msg: plaintext,
            aad: &self.hash,
        };
        let ciphertext = self
            .key
            .encrypt(iv.as_ref().into(), payload)
            .map_err(|e| HandshakeError::Crypto(e.to_string()))?;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    /// Decrypts a handshake segment. The AAD is the hash as it stood before
    /// this ciphertext was mixed in; a tag mismatch is an authentication
    /// failure, not a parse failure.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let aad = self.hash;
        let iv = gcm::generate_iv(self.post_increment_counter());
        let payload = Payload {
            msg: ciphertext,
            aad: &aad,
        };
        let plaintext = self
            .key
            .decrypt(iv.as_ref().into(), payload)
            .map_err(|_| HandshakeError::AuthFailure)?;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    /// MixKey: HKDF over the chaining key and a DH result; yields the new
    /// chaining key and AEAD key and resets the counter.
    pub fn mix_into_key(&mut self, data: &[u8]) -> Result<()> {
        self.counter = 0;
        let (salt, key) = self.extract_and_expand(Some(data))?;
        self.salt = salt;
        self.key = gcm::prepare(&key).map_err(|e| HandshakeError::Crypto(e.to_string()))?;
        Ok(())
    }

    fn extract_and_expand(&self, ikm: Option<&[u8]>) -> Result<([u8; 32], [u8; 32])> {
        let okm = hkdf::sha256(ikm.unwrap_or(&[]), Some(&self.salt), &[], 64)
            .map_err(|e| HandshakeError::Crypto(e.to_string()))?;

        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        first.copy_from_slice(&okm[..32]);
        second.copy_from_slice(&okm[32..]);
        Ok((first, second))
    }

    /// Split: derives the two one-directional transport keys and discards
    /// the symmetric state.
    pub fn finish(self) -> Result<(Aes256Gcm, Aes256Gcm)> {
        let (write_bytes, read_bytes) = self.extract_and_expand(None)?;
        let write_key =
            gcm::prepare(&write_bytes).map_err(|e| HandshakeError::Crypto(e.to_string()))?;
        let read_key =
            gcm::prepare(&read_bytes).map_err(|e| HandshakeError::Crypto(e.to_string()))?;
        Ok((write_key, read_key))
    }
}
