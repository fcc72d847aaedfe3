//! Atom codec.
//!
//! An atom is the unit of protocol conversation, carried one per data
//! frame:
//!
//! ```text
//! [u16 BE family] [u16 BE subtype] [u16 BE flags] [u16 BE request id] [body]
//! ```
//!
//! The family/subtype pair selects the operation, the request id ties
//! replies to requests, and the body layout is family-specific.

use anyhow::{bail, Result};

use super::ByteReader;

/// Fixed atom header length in bytes.
pub const HEADER_LEN: usize = 8;

/// One protocol operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub family: u16,
    pub subtype: u16,
    pub flags: u16,
    pub request_id: u16,
    pub body: Vec<u8>,
}

impl Atom {
    /// Builds an atom with zero flags.
    pub fn new(family: u16, subtype: u16, request_id: u16, body: Vec<u8>) -> Self {
        Self { family, subtype, flags: 0, request_id, body }
    }

    /// Encodes header plus body.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        buf.extend_from_slice(&self.family.to_be_bytes());
        buf.extend_from_slice(&self.subtype.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.request_id.to_be_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Decodes a data-frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is shorter than the fixed header.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < HEADER_LEN {
            bail!("Atom too short: {} bytes", payload.len());
        }
        let mut reader = ByteReader::new(payload);
        let family = reader.read_u16()?;
        let subtype = reader.read_u16()?;
        let flags = reader.read_u16()?;
        let request_id = reader.read_u16()?;
        Ok(Self {
            family,
            subtype,
            flags,
            request_id,
            body: reader.rest().to_vec(),
        })
    }

    /// Reader positioned at the start of the body.
    pub fn body_reader(&self) -> ByteReader<'_> {
        ByteReader::new(&self.body)
    }
}
