use crate::binary::error::{BinaryError, Result};
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::token;

pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.position >= self.data.len()
    }

    pub(crate) fn bytes_left(&self) -> usize {
        self.data.len() - self.position
    }

    fn check_eos(&self, len: usize) -> Result<()> {
        if self.bytes_left() >= len {
            Ok(())
        } else {
            Err(BinaryError::TruncatedMessage)
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.check_eos(1)?;
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        self.check_eos(2)?;
        let value = u16::from_be_bytes([self.data[self.position], self.data[self.position + 1]]);
        self.position += 2;
        Ok(value)
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        self.check_eos(4)?;
        let value = u32::from_be_bytes([
            self.data[self.position],
            self.data[self.position + 1],
            self.data[self.position + 2],
            self.data[self.position + 3],
        ]);
        self.position += 4;
        Ok(value)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.check_eos(len)?;
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_string_of(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    fn read_string(&mut self) -> Result<String> {
        let b = self.read_u8()?;
        if let Some(tok) = token::get(b) {
            return Ok(tok.to_string());
        }
        if b == token::STRING_16 {
            let len = self.read_u16_be()? as usize;
            return self.read_string_of(len);
        }
        if b < 128 {
            return self.read_string_of(b as usize);
        }
        Err(BinaryError::InvalidDictionaryIndex(b))
    }

    fn read_content(&mut self) -> Result<NodeContent> {
        let b = self.read_u8()?;
        if b < 128 {
            let mut children = Vec::with_capacity(b as usize);
            for _ in 0..b {
                children.push(self.read_node()?);
            }
            return Ok(NodeContent::Nodes(children));
        }
        match b {
            token::STRING_16 => {
                let len = self.read_u16_be()? as usize;
                Ok(NodeContent::String(self.read_string_of(len)?))
            }
            token::BINARY_32 => {
                let len = self.read_u32_be()? as usize;
                Ok(NodeContent::Bytes(self.read_bytes(len)?.to_vec()))
            }
            inline_len => Ok(NodeContent::Bytes(
                self.read_bytes(inline_len as usize)?.to_vec(),
            )),
        }
    }

    pub(crate) fn read_node(&mut self) -> Result<Node> {
        let descriptor = self.read_u8()?;
        let attr_count = (descriptor >> 1) as usize;
        let has_content = descriptor & 1 == 1;

        let tag = self.read_string()?;
        if tag.is_empty() {
            return Err(BinaryError::InvalidNode);
        }

        let mut attrs = Attrs::with_capacity(attr_count);
        for _ in 0..attr_count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            attrs.insert(key, value);
        }

        let content = if has_content {
            Some(self.read_content()?)
        } else {
            None
        };

        Ok(Node {
            tag,
            attrs,
            content,
        })
    }
}
