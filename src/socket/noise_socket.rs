use aes_gcm::aead::Aead;
use aes_gcm::Aes256Gcm;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::crypto::gcm::generate_iv;
use crate::framing;
use crate::socket::error::{Result, SocketError};
use crate::transport::Transport;

/// The post-split transport: one AEAD key and counter per direction, no
/// further transcript hashing. Holds the transport for outbound frames;
/// inbound frames are decrypted by the receive loop via
/// [`Self::decrypt_frame`].
pub struct NoiseSocket {
    transport: Arc<dyn Transport>,
    write_key: Aes256Gcm,
    read_key: Aes256Gcm,
    write_counter: AtomicU32,
    read_counter: AtomicU32,
}

impl NoiseSocket {
    pub fn new(transport: Arc<dyn Transport>, write_key: Aes256Gcm, read_key: Aes256Gcm) -> Self {
        Self {
            transport,
            write_key,
            read_key,
            write_counter: AtomicU32::new(0),
            read_counter: AtomicU32::new(0),
        }
    }

    /// Claims the next nonce for a direction. Refusing the final counter
    /// value keeps any nonce from ever being reused under the same key.
    fn next_counter(counter: &AtomicU32) -> Result<u32> {
        let value = counter.fetch_add(1, Ordering::SeqCst);
        if value == u32::MAX {
            return Err(SocketError::NonceOverflow);
        }
        Ok(value)
    }

    /// Encrypts, frames, and sends one application payload.
    pub async fn encrypt_and_send(&self, plaintext: &[u8]) -> Result<()> {
        let counter = Self::next_counter(&self.write_counter)?;
        let iv = generate_iv(counter);
        let ciphertext = self
            .write_key
            .encrypt(iv.as_ref().into(), plaintext)
            .map_err(|e| SocketError::Crypto(e.to_string()))?;

        let framed = framing::encode_frame(&ciphertext, None)
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        self.transport
            .send(&framed)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    /// Decrypts one inbound frame with the read key and its counter.
    pub fn decrypt_frame(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let counter = Self::next_counter(&self.read_counter)?;
        let iv = generate_iv(counter);
        self.read_key
            .decrypt(iv.as_ref().into(), ciphertext)
            .map_err(|e| SocketError::Crypto(e.to_string()))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
