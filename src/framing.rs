//! Length-prefixed framing over the binary WebSocket stream.
//!
//! Every payload travels behind a 3-byte big-endian length. WebSocket
//! message boundaries carry no meaning: one message may hold one frame,
//! several, or a fragment, so inbound chunks are buffered until a whole
//! frame is available.

use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use crate::binary::token::DICT_VERSION;

pub const FRAME_LENGTH_SIZE: usize = 3;
pub const FRAME_MAX_SIZE: usize = 1 << 24;

/// Protocol magic for the wire header: "WA" + protocol version + dictionary
/// version. Prefixed to the very first outgoing payload and mixed into the
/// Noise transcript as the prologue.
pub const PROTO_VERSION: u8 = 6;
pub const CONN_HEADER: [u8; 4] = [b'W', b'A', PROTO_VERSION, DICT_VERSION];

/// Encodes a payload into a frame, optionally preceded by the connection
/// header (first frame of a connection only).
pub fn encode_frame(payload: &[u8], header: Option<&[u8]>) -> Result<Vec<u8>, anyhow::Error> {
    let payload_len = payload.len();
    if payload_len >= FRAME_MAX_SIZE {
        return Err(anyhow::anyhow!(
            "Frame is too large (max: {}, got: {})",
            FRAME_MAX_SIZE,
            payload_len
        ));
    }

    let header_len = header.map(|h| h.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(header_len + FRAME_LENGTH_SIZE + payload_len);
    if let Some(header) = header {
        out.extend_from_slice(header);
    }
    let len_bytes = u32::to_be_bytes(payload_len as u32);
    out.extend_from_slice(&len_bytes[1..]);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Buffers incoming transport chunks and detaches complete frames.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pops one complete frame if the buffer holds its length prefix and
    /// that many payload bytes.
    pub fn decode_frame(&mut self) -> Option<Bytes> {
        if self.buffer.len() < FRAME_LENGTH_SIZE {
            return None;
        }

        let frame_len = ((self.buffer[0] as usize) << 16)
            | ((self.buffer[1] as usize) << 8)
            | (self.buffer[2] as usize);

        if self.buffer.len() >= FRAME_LENGTH_SIZE + frame_len {
            self.buffer.advance(FRAME_LENGTH_SIZE);
            let frame_data = self.buffer.split_to(frame_len).freeze();
            trace!("<-- Assembled frame: {} bytes", frame_data.len());
            Some(frame_data)
        } else {
            None
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
