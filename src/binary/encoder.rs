use std::io::Write;

use crate::binary::error::{BinaryError, Result};
use crate::binary::node::{Node, NodeContent};
use crate::binary::token;

/// Longest byte payload that can be written with an inline length byte.
/// Shorter payloads would collide with the child-count range, longer ones
/// with the `STRING_16`/`BINARY_32` markers.
const INLINE_BYTES_MIN: usize = 128;
const INLINE_BYTES_MAX: usize = 252;

pub(crate) struct Encoder<W: Write> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self { writer }
    }

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.writer.write_all(&[val])?;
        Ok(())
    }

    fn write_u16_be(&mut self, val: u16) -> Result<()> {
        self.writer.write_all(&val.to_be_bytes())?;
        Ok(())
    }

    fn write_u32_be(&mut self, val: u32) -> Result<()> {
        self.writer.write_all(&val.to_be_bytes())?;
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    /// Tag and attribute position: dictionary token, bare length byte, or
    /// the `STRING_16` form. A bare length byte is only usable when the
    /// dictionary slot of that value is empty, so decode stays unambiguous.
    fn write_string(&mut self, s: &str) -> Result<()> {
        if let Some(index) = token::index_of(s) {
            return self.write_u8(index);
        }
        let len = s.len();
        if len < 128 && token::get(len as u8).is_none() {
            self.write_u8(len as u8)?;
        } else if len <= u16::MAX as usize {
            self.write_u8(token::STRING_16)?;
            self.write_u16_be(len as u16)?;
        } else {
            return Err(BinaryError::StringTooLong(len));
        }
        self.write_raw(s.as_bytes())
    }

    fn write_content(&mut self, content: &NodeContent) -> Result<()> {
        match content {
            // Content position discriminates on the first byte, so strings
            // always take the STRING_16 form here.
            NodeContent::String(s) => {
                if s.len() > u16::MAX as usize {
                    return Err(BinaryError::StringTooLong(s.len()));
                }
                self.write_u8(token::STRING_16)?;
                self.write_u16_be(s.len() as u16)?;
                self.write_raw(s.as_bytes())
            }
            NodeContent::Bytes(bytes) => {
                let len = bytes.len();
                if (INLINE_BYTES_MIN..=INLINE_BYTES_MAX).contains(&len) {
                    self.write_u8(len as u8)?;
                } else {
                    self.write_u8(token::BINARY_32)?;
                    self.write_u32_be(len as u32)?;
                }
                self.write_raw(bytes)
            }
            NodeContent::Nodes(children) => {
                if children.len() > 127 {
                    return Err(BinaryError::TooManyChildren(children.len()));
                }
                self.write_u8(children.len() as u8)?;
                for child in children {
                    self.write_node(child)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn write_node(&mut self, node: &Node) -> Result<()> {
        if node.attrs.len() > 127 {
            return Err(BinaryError::TooManyAttrs(node.attrs.len()));
        }
        let mut descriptor = (node.attrs.len() as u8) << 1;
        if node.content.is_some() {
            descriptor |= 1;
        }
        self.write_u8(descriptor)?;
        self.write_string(&node.tag)?;
        for (key, value) in &node.attrs {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        if let Some(content) = &node.content {
            self.write_content(content)?;
        }
        Ok(())
    }
}
