//! Frame codec for the session transport.
//!
//! Every connection carries a stream of length-prefixed frames:
//!
//! ```text
//! [u8 type] [u16 BE sequence] [u16 BE length] [payload: length bytes]
//! ```
//!
//! Frame types:
//! - `0x01` hello: handshake open, `u32 version` plus optional cookie TLV
//! - `0x02` data: one atom
//! - `0x03` error: connection-level failure, `u16 code`
//! - `0x04` close: orderly shutdown, payload ignored
//! - `0x05` keepalive: empty payload
//!
//! Sequence numbers count outbound frames per connection, seeded randomly
//! and wrapping at `u16::MAX`. Inbound sequence gaps are reported to the
//! caller but do not fail decoding.

use anyhow::{anyhow, bail, Result};
use bytes::BytesMut;

use super::atom::Atom;
use super::tlv::{self, TlvBlock};
use crate::constants::{tlv as tlv_type, PROTOCOL_VERSION};

/// Fixed frame header length in bytes.
pub const HEADER_LEN: usize = 5;

/// Frame type constants.
pub mod frame_kind {
    /// Handshake hello.
    pub const HELLO: u8 = 0x01;
    /// Atom data.
    pub const DATA: u8 = 0x02;
    /// Connection-level error.
    pub const ERROR: u8 = 0x03;
    /// Orderly close.
    pub const CLOSE: u8 = 0x04;
    /// Keepalive.
    pub const KEEPALIVE: u8 = 0x05;
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake open. The cookie is present on every connection except
    /// the first one to the credential server.
    Hello {
        /// Protocol version, always [`PROTOCOL_VERSION`].
        version: u32,
        /// Handoff cookie from a redirect, if any.
        cookie: Option<Vec<u8>>,
    },

    /// One atom.
    Data(Atom),

    /// Connection-level error; the peer will close after sending this.
    Error {
        /// Wire error code.
        code: u16,
    },

    /// Orderly shutdown.
    Close,

    /// Liveness probe, no payload.
    Keepalive,
}

impl Frame {
    /// Convenience constructor for the common hello shape.
    pub fn hello(cookie: Option<Vec<u8>>) -> Self {
        Frame::Hello { version: PROTOCOL_VERSION, cookie }
    }

    /// Encode this frame with the given sequence number.
    ///
    /// Returns `[u8 type][u16 BE seq][u16 BE length][payload]`.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds the u16 length field. A frame that
    /// fails to encode must be dropped whole; a truncated length would
    /// desynchronize the stream for the peer.
    pub fn encode(&self, seq: u16) -> Result<Vec<u8>> {
        match self {
            Frame::Hello { version, cookie } => {
                let mut payload = Vec::with_capacity(4 + cookie.as_ref().map_or(0, |c| c.len() + 4));
                payload.extend_from_slice(&version.to_be_bytes());
                if let Some(cookie) = cookie {
                    tlv::put_tlv(&mut payload, tlv_type::COOKIE, cookie);
                }
                encode_raw(frame_kind::HELLO, seq, &payload)
            }
            Frame::Data(atom) => encode_raw(frame_kind::DATA, seq, &atom.encode()),
            Frame::Error { code } => encode_raw(frame_kind::ERROR, seq, &code.to_be_bytes()),
            Frame::Close => encode_raw(frame_kind::CLOSE, seq, &[]),
            Frame::Keepalive => encode_raw(frame_kind::KEEPALIVE, seq, &[]),
        }
    }
}

/// Encode a raw frame with type byte, sequence, and payload.
fn encode_raw(kind: u8, seq: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u16::try_from(payload.len())
        .map_err(|_| anyhow!("Frame payload of {} bytes exceeds the u16 length field", payload.len()))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(kind);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a single frame from a type byte and payload.
fn decode_frame(kind: u8, payload: &[u8]) -> Result<Frame> {
    match kind {
        frame_kind::HELLO => {
            if payload.len() < 4 {
                bail!("Hello frame too short: {} bytes", payload.len());
            }
            let version = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let tlvs = TlvBlock::decode(&payload[4..])
                .map_err(|e| anyhow!("Invalid hello attributes: {e}"))?;
            let cookie = tlvs.bytes(tlv_type::COOKIE).map(<[u8]>::to_vec);
            Ok(Frame::Hello { version, cookie })
        }
        frame_kind::DATA => Ok(Frame::Data(Atom::decode(payload)?)),
        frame_kind::ERROR => {
            if payload.len() < 2 {
                bail!("Error frame too short: {} bytes", payload.len());
            }
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            Ok(Frame::Error { code })
        }
        // Close frames may carry diagnostic attributes; nothing in them
        // changes how we shut down, so the payload is dropped.
        frame_kind::CLOSE => Ok(Frame::Close),
        frame_kind::KEEPALIVE => Ok(Frame::Keepalive),
        _ => bail!("Unknown frame type: 0x{kind:02X}"),
    }
}

/// A frame as read off the wire, with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub seq: u16,
    pub frame: Frame,
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`], then pull complete frames one at
/// a time with [`FrameDecoder::next_frame`]. Handles TCP-style byte stream
/// reassembly; output never depends on how the input was chunked, even
/// when a malformed frame ends the stream — every frame ahead of the bad
/// one is still yielded before the error.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// A malformed frame was seen; the stream position is untrustworthy
    /// and no further frames may be decoded.
    poisoned: bool,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            poisoned: false,
        }
    }

    /// Buffers bytes for decoding. Call [`FrameDecoder::next_frame`] to
    /// drain the complete frames they form.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decodes the next complete frame, or `Ok(None)` when only partial
    /// data remains buffered.
    ///
    /// # Errors
    ///
    /// Returns an error on a malformed frame; the connection must be torn
    /// down because the stream position is no longer trustworthy, and
    /// every later call fails the same way.
    pub fn next_frame(&mut self) -> Result<Option<InboundFrame>> {
        if self.poisoned {
            bail!("Stream position lost after a malformed frame");
        }
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = self.buf[0];
        let seq = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        let length = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;

        let total = HEADER_LEN + length;
        if self.buf.len() < total {
            return Ok(None); // Incomplete frame, wait for more data
        }

        let raw = self.buf.split_to(total);
        match decode_frame(kind, &raw[HEADER_LEN..]) {
            Ok(frame) => Ok(Some(InboundFrame { seq, frame })),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound sequence counter, seeded randomly per connection.
#[derive(Debug)]
pub struct SequenceCounter {
    current: u16,
}

impl SequenceCounter {
    /// Counter starting at a random value.
    pub fn new() -> Self {
        Self { current: rand::random::<u16>() }
    }

    /// Counter starting at a fixed value.
    pub fn starting_at(seed: u16) -> Self {
        Self { current: seed }
    }

    /// Returns the next sequence number, wrapping at `u16::MAX`.
    pub fn next_seq(&mut self) -> u16 {
        let seq = self.current;
        self.current = self.current.wrapping_add(1);
        seq
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut FrameDecoder) -> Vec<InboundFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn feed_one(encoded: &[u8]) -> InboundFrame {
        let mut decoder = FrameDecoder::new();
        decoder.feed(encoded);
        let mut frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert!(!decoder.has_partial());
        frames.remove(0)
    }

    #[test]
    fn test_hello_round_trip_with_cookie() {
        let frame = Frame::hello(Some(vec![0xAA; 16]));
        let got = feed_one(&frame.encode(7).unwrap());
        assert_eq!(got.seq, 7);
        assert_eq!(got.frame, frame);
    }

    #[test]
    fn test_hello_round_trip_without_cookie() {
        let frame = Frame::hello(None);
        let got = feed_one(&frame.encode(0).unwrap());
        assert_eq!(got.frame, frame);
    }

    #[test]
    fn test_data_round_trip() {
        let atom = Atom::new(0x0004, 0x0006, 42, b"body".to_vec());
        let frame = Frame::Data(atom);
        let got = feed_one(&frame.encode(0x8000).unwrap());
        assert_eq!(got.seq, 0x8000);
        assert_eq!(got.frame, frame);
    }

    #[test]
    fn test_keepalive_has_empty_payload() {
        let encoded = Frame::Keepalive.encode(3).unwrap();
        assert_eq!(encoded.len(), HEADER_LEN);
        assert_eq!(feed_one(&encoded).frame, Frame::Keepalive);
    }

    #[test]
    fn test_error_frame_round_trip() {
        let got = feed_one(&Frame::Error { code: 0x0005 }.encode(1).unwrap());
        assert_eq!(got.frame, Frame::Error { code: 0x0005 });
    }

    #[test]
    fn test_close_payload_ignored() {
        let encoded = encode_raw(frame_kind::CLOSE, 9, b"diagnostic junk").unwrap();
        assert_eq!(feed_one(&encoded).frame, Frame::Close);
    }

    #[test]
    fn test_oversize_payload_refused() {
        let frame = Frame::Data(Atom::new(0x0010, 0x0002, 1, vec![0u8; 70_000]));
        assert!(frame.encode(1).is_err());
        // One byte under the limit (atom header takes 8) still encodes.
        let frame = Frame::Data(Atom::new(0x0010, 0x0002, 1, vec![0u8; 65_527]));
        assert!(frame.encode(1).is_ok());
    }

    #[test]
    fn test_multiple_frames_in_single_feed() {
        let f1 = Frame::Keepalive;
        let f2 = Frame::Data(Atom::new(0x0001, 0x0003, 0, Vec::new()));
        let f3 = Frame::Close;

        let mut buf = Vec::new();
        buf.extend_from_slice(&f1.encode(10).unwrap());
        buf.extend_from_slice(&f2.encode(11).unwrap());
        buf.extend_from_slice(&f3.encode(12).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.feed(&buf);
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].seq, 10);
        assert_eq!(frames[1].frame, f2);
        assert_eq!(frames[2].frame, f3);
    }

    #[test]
    fn test_partial_frame_reassembly() {
        let frame = Frame::Data(Atom::new(0x0013, 0x0006, 5, vec![1, 2, 3, 4, 5]));
        let encoded = frame.encode(100).unwrap();

        let mut decoder = FrameDecoder::new();

        // Feed first half
        let mid = encoded.len() / 2;
        decoder.feed(&encoded[..mid]);
        assert!(drain(&mut decoder).is_empty());
        assert!(decoder.has_partial());

        // Feed second half
        decoder.feed(&encoded[mid..]);
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame, frame);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = Frame::Data(Atom::new(0x0004, 0x0014, 1, vec![0x00, 0x02]));
        let encoded = frame.encode(0xFFFF).unwrap();

        let mut decoder = FrameDecoder::new();
        for (i, byte) in encoded.iter().enumerate() {
            decoder.feed(&[*byte]);
            let frames = drain(&mut decoder);
            if i < encoded.len() - 1 {
                assert_eq!(frames.len(), 0);
            } else {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].seq, 0xFFFF);
                assert_eq!(frames[0].frame, frame);
            }
        }
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let buf = encode_raw(0x7F, 0, b"test").unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.feed(&buf);
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_truncated_hello_rejected() {
        let buf = encode_raw(frame_kind::HELLO, 0, &[0x00, 0x00]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.feed(&buf);
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_frames_before_a_malformed_one_still_arrive() {
        // A valid keepalive and data frame ahead of garbage in one chunk
        // must be yielded before the error, so delivery does not depend
        // on where the read boundaries fell.
        let data = Frame::Data(Atom::new(0x0013, 0x0006, 2, Vec::new()));
        let mut buf = Frame::Keepalive.encode(4).unwrap();
        buf.extend_from_slice(&data.encode(5).unwrap());
        buf.extend_from_slice(&encode_raw(0x7F, 6, b"junk").unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.feed(&buf);
        assert_eq!(decoder.next_frame().unwrap().unwrap().frame, Frame::Keepalive);
        assert_eq!(decoder.next_frame().unwrap().unwrap().frame, data);
        assert!(decoder.next_frame().is_err());
        // Poisoned for good; later reads must not resynchronize.
        decoder.feed(&Frame::Keepalive.encode(7).unwrap());
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut counter = SequenceCounter::starting_at(u16::MAX);
        assert_eq!(counter.next_seq(), u16::MAX);
        assert_eq!(counter.next_seq(), 0);
        assert_eq!(counter.next_seq(), 1);
    }
}
