//! The wire framing shared by [`crate::Transaction`] and
//! [`crate::FraudProof`]: every field is a length-prefixed byte string, and
//! every sequence is a count followed by that many length-prefixed fields,
//! all integers big-endian `u32`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated: needed {needed} more bytes at offset {offset}, got {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("{trailing} trailing bytes after decoding the last field")]
    TrailingBytes { trailing: usize },
}

pub fn write_field(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

pub fn write_seq(buf: &mut Vec<u8>, items: &[Vec<u8>]) {
    buf.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        write_field(buf, item);
    }
}

pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// A cursor over an immutable byte slice that decodes the framing above,
/// failing closed the moment a declared length would run past the end of
/// the buffer rather than trusting an attacker-supplied count.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let available = self.data.len().saturating_sub(self.pos);
        if len > available {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len,
                available,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_field(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Decodes a count-prefixed sequence of fields. Does not pre-allocate
    /// by the declared count: an inflated count simply runs out of bytes
    /// and fails on the next field, rather than driving an allocation
    /// sized by untrusted input.
    pub fn read_seq(&mut self) -> Result<Vec<Vec<u8>>, CodecError> {
        let count = self.read_u32()? as usize;
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(self.read_field()?);
        }
        Ok(out)
    }

    pub fn finish(self) -> Result<(), CodecError> {
        let trailing = self.data.len() - self.pos;
        if trailing != 0 {
            return Err(CodecError::TrailingBytes { trailing });
        }
        Ok(())
    }
}
