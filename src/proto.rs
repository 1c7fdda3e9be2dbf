//! Hand-written protobuf subset for the Noise handshake messages.
//!
//! The handshake speaks a three-field `HandshakeMessage`: ClientHello
//! (field 2), ServerHello (field 3) and ClientFinish (field 4), each an
//! inner message of byte fields. Only wire types 0 (varint), 1 (fixed64),
//! 2 (length-delimited) and 5 (fixed32) exist on this path; unknown fields
//! are skipped by wire type.

use thiserror::Error;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_BYTES: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const FIELD_CLIENT_HELLO: u32 = 2;
const FIELD_SERVER_HELLO: u32 = 3;
const FIELD_CLIENT_FINISH: u32 = 4;

const FIELD_EPHEMERAL: u32 = 1;
const FIELD_STATIC: u32 = 2;
const FIELD_PAYLOAD: u32 = 3;

#[derive(Debug, Error, PartialEq)]
pub enum ProtoError {
    #[error("Malformed varint: continuation past 64 bits or truncated")]
    MalformedVarint,
    #[error("Truncated message: field extends past end of buffer")]
    TruncatedMessage,
    #[error("Unknown wire type {0}")]
    UnknownWireType(u8),
}

pub type Result<T> = std::result::Result<T, ProtoError>;

/// Appends `n` as an unsigned little-endian base-128 varint.
pub fn encode_varint(mut n: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (n & 0x7F) as u8;
        n >>= 7;
        if n > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if n == 0 {
            break;
        }
    }
}

/// Decodes a varint from the front of `data`, returning the value and the
/// number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        if shift >= 64 {
            return Err(ProtoError::MalformedVarint);
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte < 0x80 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(ProtoError::MalformedVarint)
}

fn encode_tag(field: u32, wire_type: u8, out: &mut Vec<u8>) {
    encode_varint(u64::from(field) << 3 | u64::from(wire_type), out);
}

/// Appends a length-delimited field. Empty fields are omitted, matching
/// proto3 presence rules for bytes.
pub fn encode_bytes_field(field: u32, data: &[u8], out: &mut Vec<u8>) {
    if data.is_empty() {
        return;
    }
    encode_tag(field, WIRE_BYTES, out);
    encode_varint(data.len() as u64, out);
    out.extend_from_slice(data);
}

/// Walks `data` looking for a length-delimited field, skipping unknown
/// fields by wire type.
pub fn find_field(data: &[u8], target: u32) -> Result<Option<&[u8]>> {
    let mut pos = 0;
    while pos < data.len() {
        let (tag, used) = decode_varint(&data[pos..])?;
        pos += used;
        let field = (tag >> 3) as u32;
        let wire_type = (tag & 0x7) as u8;

        match wire_type {
            WIRE_VARINT => {
                let (_, used) = decode_varint(&data[pos..])?;
                pos += used;
            }
            WIRE_FIXED64 => {
                if pos + 8 > data.len() {
                    return Err(ProtoError::TruncatedMessage);
                }
                pos += 8;
            }
            WIRE_FIXED32 => {
                if pos + 4 > data.len() {
                    return Err(ProtoError::TruncatedMessage);
                }
                pos += 4;
            }
            WIRE_BYTES => {
                let (len, used) = decode_varint(&data[pos..])?;
                pos += used;
                let len = len as usize;
                if pos + len > data.len() {
                    return Err(ProtoError::TruncatedMessage);
                }
                if field == target {
                    return Ok(Some(&data[pos..pos + len]));
                }
                pos += len;
            }
            other => return Err(ProtoError::UnknownWireType(other)),
        }
    }
    Ok(None)
}

/// Builds a `HandshakeMessage` carrying a ClientHello with the ephemeral
/// public key.
pub fn encode_client_hello(ephemeral: &[u8; 32]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(2 + ephemeral.len());
    encode_bytes_field(FIELD_EPHEMERAL, ephemeral, &mut inner);

    let mut out = Vec::with_capacity(2 + inner.len());
    encode_bytes_field(FIELD_CLIENT_HELLO, &inner, &mut out);
    out
}

/// Builds a `HandshakeMessage` carrying a ClientFinish with the encrypted
/// static key and (possibly empty) encrypted payload.
pub fn encode_client_finish(static_ciphertext: &[u8], payload_ciphertext: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(4 + static_ciphertext.len() + payload_ciphertext.len());
    encode_bytes_field(FIELD_STATIC, static_ciphertext, &mut inner);
    encode_bytes_field(FIELD_PAYLOAD, payload_ciphertext, &mut inner);

    let mut out = Vec::with_capacity(4 + inner.len());
    encode_bytes_field(FIELD_CLIENT_FINISH, &inner, &mut out);
    out
}

/// Parsed fields of a ServerHello.
#[derive(Debug, Default, PartialEq)]
pub struct ServerHello {
    pub ephemeral: Vec<u8>,
    pub static_ciphertext: Vec<u8>,
    pub payload_ciphertext: Vec<u8>,
}

/// Extracts the ServerHello from a handshake response.
///
/// Accepts a full `HandshakeMessage` wrapper or a bare inner ServerHello.
/// When neither parses to a 32-byte ephemeral, the first 32 bytes are taken
/// as the server ephemeral and any trailing bytes as the static blob; this
/// matches observed server behaviour.
pub fn decode_server_hello(data: &[u8]) -> Result<ServerHello> {
    let inner = match find_field(data, FIELD_SERVER_HELLO) {
        Ok(Some(inner)) => inner,
        // No wrapper: the data may be the inner message itself.
        Ok(None) | Err(_) => data,
    };

    let mut hello = ServerHello::default();
    if let Ok(Some(ephemeral)) = find_field(inner, FIELD_EPHEMERAL) {
        hello.ephemeral = ephemeral.to_vec();
    }
    if let Ok(Some(static_ct)) = find_field(inner, FIELD_STATIC) {
        hello.static_ciphertext = static_ct.to_vec();
    }
    if let Ok(Some(payload)) = find_field(inner, FIELD_PAYLOAD) {
        hello.payload_ciphertext = payload.to_vec();
    }

    if hello.ephemeral.len() != 32 {
        if data.len() < 32 {
            return Err(ProtoError::TruncatedMessage);
        }
        hello.ephemeral = data[..32].to_vec();
        hello.static_ciphertext = data[32..].to_vec();
        hello.payload_ciphertext.clear();
    }

    Ok(hello)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for n in [
            0u64,
            1,
            127,
            128,
            300,
            16_383,
            16_384,
            u32::MAX as u64,
            u64::MAX - 1,
            u64::MAX,
        ] {
            let mut buf = Vec::new();
            encode_varint(n, &mut buf);
            let (decoded, used) = decode_varint(&buf).expect("decode");
            assert_eq!(decoded, n);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn test_varint_encoded_widths() {
        let widths = [(0u64, 1usize), (300, 2), (u32::MAX as u64, 5), (u64::MAX, 10)];
        for (n, expected) in widths {
            let mut buf = Vec::new();
            encode_varint(n, &mut buf);
            assert_eq!(buf.len(), expected, "varint width of {n}");
        }
        let mut zero = Vec::new();
        encode_varint(0, &mut zero);
        assert_eq!(zero, [0x00]);
    }

    #[test]
    fn test_varint_overflow_rejected() {
        // Eleven continuation bytes shift past 64 bits.
        let data = [0x80u8; 11];
        assert_eq!(decode_varint(&data), Err(ProtoError::MalformedVarint));
        // A lone continuation byte is truncated.
        assert_eq!(decode_varint(&[0x80]), Err(ProtoError::MalformedVarint));
    }

    #[test]
    fn test_client_hello_shape() {
        let ephemeral = [0x42u8; 32];
        let encoded = encode_client_hello(&ephemeral);
        // tag(field 2, bytes) + len + inner(tag(field 1, bytes) + len + key)
        assert_eq!(encoded[0], 2 << 3 | 2);
        let inner = find_field(&encoded, FIELD_CLIENT_HELLO)
            .unwrap()
            .expect("client hello field");
        let key = find_field(inner, FIELD_EPHEMERAL).unwrap().expect("key");
        assert_eq!(key, ephemeral);
    }

    #[test]
    fn test_client_finish_omits_empty_payload() {
        let encoded = encode_client_finish(&[0xAA; 48], &[]);
        let inner = find_field(&encoded, FIELD_CLIENT_FINISH)
            .unwrap()
            .expect("client finish field");
        assert!(find_field(inner, FIELD_STATIC).unwrap().is_some());
        assert!(find_field(inner, FIELD_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn test_server_hello_wrapped() {
        let ephemeral = [0x11u8; 32];
        let static_ct = vec![0x22u8; 48];
        let payload_ct = vec![0x33u8; 16];

        let mut inner = Vec::new();
        encode_bytes_field(FIELD_EPHEMERAL, &ephemeral, &mut inner);
        encode_bytes_field(FIELD_STATIC, &static_ct, &mut inner);
        encode_bytes_field(FIELD_PAYLOAD, &payload_ct, &mut inner);
        let mut wrapped = Vec::new();
        encode_bytes_field(FIELD_SERVER_HELLO, &inner, &mut wrapped);

        let hello = decode_server_hello(&wrapped).expect("decode");
        assert_eq!(hello.ephemeral, ephemeral);
        assert_eq!(hello.static_ciphertext, static_ct);
        assert_eq!(hello.payload_ciphertext, payload_ct);

        // The bare inner message must parse identically.
        let bare = decode_server_hello(&inner).expect("decode bare");
        assert_eq!(bare.ephemeral, ephemeral);
        assert_eq!(bare.static_ciphertext, static_ct);
    }

    #[test]
    fn test_server_hello_raw_fallback() {
        let mut raw = vec![0x07u8; 32];
        raw.extend_from_slice(&[0x09; 48]);
        let hello = decode_server_hello(&raw).expect("decode");
        assert_eq!(hello.ephemeral, &raw[..32]);
        assert_eq!(hello.static_ciphertext, &raw[32..]);
    }

    #[test]
    fn test_server_hello_too_short() {
        assert_eq!(
            decode_server_hello(&[0u8; 10]),
            Err(ProtoError::TruncatedMessage)
        );
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let ephemeral = [0x55u8; 32];
        let mut inner = Vec::new();
        // varint field 7, fixed32 field 8, fixed64 field 9 ahead of the key
        encode_tag(7, WIRE_VARINT, &mut inner);
        encode_varint(12345, &mut inner);
        encode_tag(8, WIRE_FIXED32, &mut inner);
        inner.extend_from_slice(&[1, 2, 3, 4]);
        encode_tag(9, WIRE_FIXED64, &mut inner);
        inner.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        encode_bytes_field(FIELD_EPHEMERAL, &ephemeral, &mut inner);

        let key = find_field(&inner, FIELD_EPHEMERAL).unwrap().expect("key");
        assert_eq!(key, ephemeral);
    }

    #[test]
    fn test_unknown_wire_type_rejected() {
        let mut data = Vec::new();
        encode_tag(1, 3, &mut data); // wire type 3 (group start) unsupported
        assert_eq!(find_field(&data, 2), Err(ProtoError::UnknownWireType(3)));
    }
}
