//! Wire codec: frames, atoms, and TLV attribute lists.
//!
//! The transport carries length-prefixed [`frame::Frame`]s. Data frames
//! carry one [`atom::Atom`] each; most atom bodies are TLV lists decoded
//! through [`tlv::TlvBlock`]. Decoding is strict: a malformed frame means
//! the stream position is lost and the connection must be torn down.

pub mod atom;
pub mod frame;
pub mod tlv;

use anyhow::{bail, Result};

/// Bounds-checked sequential reader over an atom body.
///
/// Protocol bodies mix fixed-width integers, length-prefixed strings, and
/// trailing TLV blocks; this keeps the offset arithmetic in one place.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Consumes and returns the rest of the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.take(1)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Reads a u8-length-prefixed byte string.
    pub fn read_string8(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.take(len)
    }

    /// Reads a u16-length-prefixed byte string.
    pub fn read_string16(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            bail!(
                "Truncated body: need {len} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            );
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_walks_mixed_fields() {
        let buf = [0x01, 0x00, 0x02, 0x03, b'a', b'b', b'c'];
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0002);
        assert_eq!(r.read_string8().unwrap(), b"abc");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_reader_rejects_overrun() {
        let buf = [0x00, 0x05, b'x'];
        let mut r = ByteReader::new(&buf);
        assert!(r.read_string16().is_err());
    }

    #[test]
    fn test_rest_consumes_everything() {
        let buf = [1, 2, 3, 4];
        let mut r = ByteReader::new(&buf);
        r.read_u8().unwrap();
        assert_eq!(r.rest(), &[2, 3, 4]);
        assert_eq!(r.remaining(), 0);
    }
}
