//! Dictionary-compressed codec for the application-layer binary nodes.
//!
//! Each node is a descriptor byte `(attr_count << 1) | content_present`,
//! the tag, `attr_count` key/value pairs, and optional content. Strings are
//! compressed through the fixed token dictionary in [`token`].

mod decoder;
mod encoder;
pub mod error;
pub mod node;
pub mod token;

pub use error::{BinaryError, Result};
pub use node::{Attrs, Node, NodeContent};

use decoder::Decoder;
use encoder::Encoder;

const DEFAULT_MARSHAL_CAPACITY: usize = 256;

/// Serializes a node to its wire form.
pub fn marshal(node: &Node) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(DEFAULT_MARSHAL_CAPACITY);
    let mut encoder = Encoder::new(&mut payload);
    encoder.write_node(node)?;
    Ok(payload)
}

/// Decodes exactly one node from `data`, rejecting trailing bytes.
pub fn unmarshal(data: &[u8]) -> Result<Node> {
    let mut decoder = Decoder::new(data);
    let node = decoder.read_node()?;
    if decoder.is_finished() {
        Ok(node)
    } else {
        Err(BinaryError::LeftoverData(decoder.bytes_left()))
    }
}
