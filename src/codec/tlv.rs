//! Type-length-value attribute lists.
//!
//! Most atom bodies end in a run of TLVs:
//!
//! ```text
//! [u16 BE type] [u16 BE length] [value: length bytes]
//! ```
//!
//! Unknown types are preserved on decode and skipped by callers, which is
//! what keeps the protocol extensible across server generations.

use anyhow::{bail, Result};

use super::ByteReader;

/// One decoded attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub kind: u16,
    pub value: Vec<u8>,
}

/// A decoded TLV list with lookup helpers.
///
/// Lookups return the first attribute of a type; the wire format permits
/// duplicates but every list this crate consumes treats the first as
/// authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvBlock {
    entries: Vec<Tlv>,
}

impl TlvBlock {
    /// Decodes a buffer that consists entirely of TLVs.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let mut entries = Vec::new();
        while reader.remaining() > 0 {
            if reader.remaining() < 4 {
                bail!("TLV header truncated: {} trailing bytes", reader.remaining());
            }
            let kind = reader.read_u16()?;
            let len = reader.read_u16()? as usize;
            if reader.remaining() < len {
                bail!("TLV 0x{kind:04X} length {len} exceeds remaining {}", reader.remaining());
            }
            let value = reader.read_bytes(len)?.to_vec();
            entries.push(Tlv { kind, value });
        }
        Ok(Self { entries })
    }

    /// Decodes exactly `count` TLVs from the reader, leaving the rest.
    pub fn decode_counted(reader: &mut ByteReader<'_>, count: usize) -> Result<Self> {
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let kind = reader.read_u16()?;
            let len = reader.read_u16()? as usize;
            let value = reader.read_bytes(len)?.to_vec();
            entries.push(Tlv { kind, value });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tlv> {
        self.entries.iter()
    }

    /// Whether an attribute of this type is present (zero-length counts).
    pub fn has(&self, kind: u16) -> bool {
        self.entries.iter().any(|t| t.kind == kind)
    }

    /// Raw bytes of the first attribute of this type.
    pub fn bytes(&self, kind: u16) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.value.as_slice())
    }

    /// First attribute of this type as a big-endian u16.
    pub fn u16(&self, kind: u16) -> Option<u16> {
        let v = self.bytes(kind)?;
        if v.len() != 2 {
            return None;
        }
        Some(u16::from_be_bytes([v[0], v[1]]))
    }

    /// First attribute of this type as a big-endian u32.
    pub fn u32(&self, kind: u16) -> Option<u32> {
        let v = self.bytes(kind)?;
        if v.len() != 4 {
            return None;
        }
        Some(u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
    }

    /// First attribute of this type as UTF-8 text, lossy on bad bytes.
    pub fn string(&self, kind: u16) -> Option<String> {
        self.bytes(kind)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Appends an attribute, keeping any existing ones of the same type.
    pub fn push(&mut self, kind: u16, value: Vec<u8>) {
        self.entries.push(Tlv { kind, value });
    }

    /// Replaces the first attribute of this type, or appends one.
    pub fn set(&mut self, kind: u16, value: Vec<u8>) {
        match self.entries.iter_mut().find(|t| t.kind == kind) {
            Some(entry) => entry.value = value,
            None => self.push(kind, value),
        }
    }

    /// Drops every attribute of this type.
    pub fn remove(&mut self, kind: u16) {
        self.entries.retain(|t| t.kind != kind);
    }

    /// Re-encodes the list in entry order.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for t in &self.entries {
            put_tlv(&mut buf, t.kind, &t.value);
        }
        buf
    }
}

/// Appends one TLV to a buffer under assembly.
///
/// A value too big for the u16 length field is truncated so the written
/// length always matches the written bytes; the buffer stays parseable
/// either way, and an oversize one is refused at frame encoding before
/// anything reaches the wire.
pub fn put_tlv(buf: &mut Vec<u8>, kind: u16, value: &[u8]) {
    let len = match u16::try_from(value.len()) {
        Ok(len) => len,
        Err(_) => {
            log::warn!("[codec] TLV 0x{kind:04X} value of {} bytes truncated to the u16 limit", value.len());
            u16::MAX
        }
    };
    buf.extend_from_slice(&kind.to_be_bytes());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&value[..usize::from(len)]);
}

/// Appends a u16-valued TLV.
pub fn put_tlv_u16(buf: &mut Vec<u8>, kind: u16, value: u16) {
    put_tlv(buf, kind, &value.to_be_bytes());
}

/// Appends a u32-valued TLV.
pub fn put_tlv_u32(buf: &mut Vec<u8>, kind: u16, value: u32) {
    put_tlv(buf, kind, &value.to_be_bytes());
}

/// Appends a u8-valued TLV.
pub fn put_tlv_u8(buf: &mut Vec<u8>, kind: u16, value: u8) {
    put_tlv(buf, kind, &[value]);
}

/// Appends a text TLV.
pub fn put_tlv_str(buf: &mut Vec<u8>, kind: u16, value: &str) {
    put_tlv(buf, kind, value.as_bytes());
}

/// Appends a zero-length flag TLV.
pub fn put_tlv_empty(buf: &mut Vec<u8>, kind: u16) {
    put_tlv(buf, kind, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_order_and_unknown_types() {
        let mut buf = Vec::new();
        put_tlv_str(&mut buf, 0x0001, "alice");
        put_tlv_u16(&mut buf, 0x9999, 0xBEEF);
        put_tlv_empty(&mut buf, 0x0066);

        let block = TlvBlock::decode(&buf).unwrap();
        assert_eq!(block.len(), 3);
        assert_eq!(block.string(0x0001).as_deref(), Some("alice"));
        assert_eq!(block.u16(0x9999), Some(0xBEEF));
        assert!(block.has(0x0066));
        assert_eq!(block.bytes(0x0066), Some(&[][..]));
        assert_eq!(block.encode(), buf);
    }

    #[test]
    fn test_first_duplicate_wins() {
        let mut buf = Vec::new();
        put_tlv_u16(&mut buf, 0x0005, 1);
        put_tlv_u16(&mut buf, 0x0005, 2);
        let block = TlvBlock::decode(&buf).unwrap();
        assert_eq!(block.u16(0x0005), Some(1));
    }

    #[test]
    fn test_wrong_width_integer_lookup_is_none() {
        let mut buf = Vec::new();
        put_tlv(&mut buf, 0x0005, &[1, 2, 3]);
        let block = TlvBlock::decode(&buf).unwrap();
        assert_eq!(block.u16(0x0005), None);
        assert_eq!(block.u32(0x0005), None);
        assert_eq!(block.bytes(0x0005), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn test_oversize_value_truncated_consistently() {
        let mut buf = Vec::new();
        put_tlv(&mut buf, 0x0001, &vec![7u8; 70_000]);
        // The written length matches the written bytes, so the block
        // still parses instead of desynchronizing.
        let block = TlvBlock::decode(&buf).unwrap();
        assert_eq!(block.bytes(0x0001).unwrap().len(), usize::from(u16::MAX));
    }

    #[test]
    fn test_truncated_value_rejected() {
        // Declares 4 value bytes, provides 2.
        let buf = [0x00, 0x01, 0x00, 0x04, 0xAA, 0xBB];
        assert!(TlvBlock::decode(&buf).is_err());
    }

    #[test]
    fn test_trailing_partial_header_rejected() {
        let mut buf = Vec::new();
        put_tlv_u8(&mut buf, 0x0001, 7);
        buf.extend_from_slice(&[0x00, 0x02]); // half a header
        assert!(TlvBlock::decode(&buf).is_err());
    }

    #[test]
    fn test_counted_decode_leaves_remainder() {
        let mut buf = Vec::new();
        put_tlv_u16(&mut buf, 0x0001, 10);
        put_tlv_u16(&mut buf, 0x0002, 20);
        buf.extend_from_slice(b"tail");

        let mut reader = ByteReader::new(&buf);
        let block = TlvBlock::decode_counted(&mut reader, 2).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(reader.rest(), b"tail");
    }
}
