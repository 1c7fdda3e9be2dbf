use aes_gcm::Aes256Gcm;

use crate::crypto::key_pair::KeyPair;
use crate::framing::CONN_HEADER;
use crate::noise::handshake::NoiseHandshake;
use crate::noise::{HandshakeError, Result, NOISE_START_PATTERN};
use crate::proto;

/// Length of an encrypted 32-byte key: plaintext plus the 16-byte GCM tag.
const ENCRYPTED_KEY_LEN: usize = 48;

/// Initiator-side XX state machine. Created fresh per connection attempt
/// with a new ephemeral pair; consumed by [`Self::finish`] at split time.
pub struct HandshakeState {
    noise: NoiseHandshake,
    ephemeral_kp: KeyPair,
    static_kp: KeyPair,
    payload: Vec<u8>,
}

impl HandshakeState {
    pub fn new(static_kp: KeyPair, payload: Vec<u8>) -> Result<Self> {
        let ephemeral_kp = KeyPair::new();

        let mut noise = NoiseHandshake::new(NOISE_START_PATTERN, &CONN_HEADER)?;
        noise.authenticate(&ephemeral_kp.public_key);

        Ok(Self {
            noise,
            ephemeral_kp,
            static_kp,
            payload,
        })
    }

    pub fn ephemeral_public(&self) -> [u8; 32] {
        self.ephemeral_kp.public_key
    }

    pub fn build_client_hello(&self) -> Vec<u8> {
        proto::encode_client_hello(&self.ephemeral_kp.public_key)
    }

    /// Consumes the ServerHello and produces the ClientFinish bytes.
    ///
    /// Parse failures surface as [`HandshakeError::Proto`] before any state
    /// is mutated, so the caller may retry with a later frame. Every other
    /// error is terminal.
    pub fn read_server_hello_and_build_client_finish(
        &mut self,
        response_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        let server_hello = proto::decode_server_hello(response_bytes)?;

        let server_ephemeral: [u8; 32] = server_hello
            .ephemeral
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::InvalidKeyLength)?;
        if server_hello.static_ciphertext.len() < ENCRYPTED_KEY_LEN {
            return Err(HandshakeError::Proto(
                crate::proto::ProtoError::TruncatedMessage,
            ));
        }

        self.noise.authenticate(&server_ephemeral);
        self.noise
            .mix_into_key(&self.ephemeral_kp.dh(&server_ephemeral))?;

        // Some servers append trailing data to the static blob; only the
        // key-plus-tag prefix is the ciphertext.
        let static_decrypted = self
            .noise
            .decrypt(&server_hello.static_ciphertext[..ENCRYPTED_KEY_LEN])?;
        let server_static: [u8; 32] = static_decrypted
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::InvalidKeyLength)?;

        self.noise
            .mix_into_key(&self.ephemeral_kp.dh(&server_static))?;

        if !server_hello.payload_ciphertext.is_empty() {
            // Server certificate payload. Decrypted to keep the transcript
            // aligned; its contents are not verified at this layer.
            self.noise.decrypt(&server_hello.payload_ciphertext)?;
        }

        let encrypted_static = self.noise.encrypt(&self.static_kp.public_key)?;
        self.noise
            .mix_into_key(&self.static_kp.dh(&server_ephemeral))?;

        let encrypted_payload = if self.payload.is_empty() {
            Vec::new()
        } else {
            self.noise.encrypt(&self.payload)?
        };

        Ok(proto::encode_client_finish(
            &encrypted_static,
            &encrypted_payload,
        ))
    }

    pub fn finish(self) -> Result<(Aes256Gcm, Aes256Gcm)> {
        self.noise.finish()
    }
}
