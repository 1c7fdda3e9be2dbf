//! Noise_XX_25519_AESGCM_SHA256 handshake engine, initiator role.
//!
//! [`handshake::NoiseHandshake`] holds the symmetric state (transcript hash,
//! chaining key, AEAD key, counter), [`state::HandshakeState`] sequences the
//! three XX messages, and [`do_handshake`] drives the exchange over the
//! framed transport.

pub mod handshake;
pub mod state;

use log::debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::crypto::key_pair::KeyPair;
use crate::framing::{self, FrameDecoder};
use crate::proto::ProtoError;
use crate::socket::NoiseSocket;
use crate::transport::{Transport, TransportEvent};

pub const NOISE_START_PATTERN: &str = "Noise_XX_25519_AESGCM_SHA256\x00\x00\x00\x00";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PARSE_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("Handshake response could not be parsed: {0}")]
    Proto(#[from] ProtoError),
    #[error("Handshake message failed authentication")]
    AuthFailure,
    #[error("Timed out waiting for a usable handshake response")]
    Timeout,
    #[error("Handshake response is missing required parts")]
    IncompleteResponse,
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Crypto operation failed: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

/// Runs the XX handshake as initiator. `resume_payload` rides encrypted in
/// the ClientFinish (empty on a fresh pairing). Returns the post-split
/// transport and the ephemeral public key, which the pairing flow embeds in
/// the QR string.
pub async fn do_handshake(
    static_kp: &KeyPair,
    resume_payload: Vec<u8>,
    transport: Arc<dyn Transport>,
    transport_events: &mut mpsc::Receiver<TransportEvent>,
) -> Result<(Arc<NoiseSocket>, [u8; 32])> {
    let mut state = state::HandshakeState::new(static_kp.clone(), resume_payload)?;
    let ephemeral_public = state.ephemeral_public();
    let mut frame_decoder = FrameDecoder::new();

    debug!("--> Sending ClientHello");
    let client_hello = state.build_client_hello();
    let framed = framing::encode_frame(&client_hello, Some(&framing::CONN_HEADER))?;
    transport.send(&framed).await?;

    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut parse_attempts = 0u32;

    // Accumulate transport chunks until one frame yields a ServerHello the
    // protobuf layer accepts. Parse failures are retried on later frames;
    // crypto failures are terminal.
    let client_finish = 'outer: loop {
        while let Some(frame) = frame_decoder.decode_frame() {
            match state.read_server_hello_and_build_client_finish(&frame) {
                Ok(finish) => break 'outer finish,
                Err(HandshakeError::Proto(e)) => {
                    parse_attempts += 1;
                    debug!("ServerHello parse attempt {parse_attempts} failed: {e}");
                    if parse_attempts >= MAX_PARSE_ATTEMPTS {
                        return Err(HandshakeError::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        match timeout_at(deadline, transport_events.recv()).await {
            Ok(Some(TransportEvent::DataReceived(data))) => frame_decoder.feed(&data),
            Ok(Some(TransportEvent::Connected)) => continue,
            Ok(Some(TransportEvent::Disconnected)) | Ok(None) | Err(_) => {
                return Err(HandshakeError::Timeout);
            }
        }
    };

    debug!("--> Sending ClientFinish");
    let framed = framing::encode_frame(&client_finish, None)?;
    transport.send(&framed).await?;

    let (write_key, read_key) = state.finish()?;
    debug!("Handshake complete, switching to encrypted transport");

    Ok((
        Arc::new(NoiseSocket::new(transport, write_key, read_key)),
        ephemeral_public,
    ))
}
