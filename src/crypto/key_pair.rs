use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

/// An X25519 key pair. Two live on every connection: a fresh ephemeral pair
/// per handshake and the persisted static identity pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    #[serde(with = "serde_bytes")]
    pub public_key: [u8; 32],
    #[serde(with = "serde_bytes")]
    pub private_key: [u8; 32],
}

impl KeyPair {
    /// Generates a new random X25519 key pair.
    pub fn new() -> Self {
        let mut p_bytes = [0u8; 32];
        OsRng.try_fill_bytes(&mut p_bytes).expect("RNG failure");
        Self::from_private_key(p_bytes)
    }

    /// Creates a key pair from an existing 32-byte private key.
    pub fn from_private_key(private_key: [u8; 32]) -> Self {
        let private = StaticSecret::from(private_key);
        let public = PublicKey::from(&private);
        Self {
            public_key: *public.as_bytes(),
            private_key: private.to_bytes(),
        }
    }

    /// X25519 Diffie-Hellman agreement with a peer's public point.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let private = StaticSecret::from(self.private_key);
        let shared = private.diffie_hellman(&PublicKey::from(*their_public));
        *shared.as_bytes()
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::new()
    }
}
