//! Instant messages: send, receive, typing notices, delivery results.
//!
//! Outbound message body:
//!
//! ```text
//! [u8 name length][recipient][TLVs: text block, optional ack request]
//! ```
//!
//! The text block TLV value is `[u8 id length][encoding id][text bytes]`.
//! Inbound messages replace the bare recipient with a full sender user
//! info block.

use anyhow::{bail, Result};

use crate::codec::atom::Atom;
use crate::codec::tlv::{self, TlvBlock};
use crate::codec::ByteReader;
use crate::constants::{family, messaging, tlv as tlv_type};
use crate::encoding::OutboundText;

use super::{decode_user_info, encode_user_info, ServerAtom, UserInfo};

/// A decoded inbound instant message, text still in wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub sender: UserInfo,
    /// Declared encoding identifier, if the sender included one.
    pub encoding: Option<String>,
    pub bytes: Vec<u8>,
    /// Sender asked for a delivery acknowledgement.
    pub wants_ack: bool,
}

/// Typing notification states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    /// Input cleared.
    Finished,
    /// Text entered but paused.
    Typed,
    /// Actively typing.
    Typing,
}

impl TypingState {
    pub fn code(self) -> u16 {
        match self {
            Self::Finished => 0x0000,
            Self::Typed => 0x0001,
            Self::Typing => 0x0002,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(Self::Finished),
            0x0001 => Some(Self::Typed),
            0x0002 => Some(Self::Typing),
            _ => None,
        }
    }
}

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        messaging::RECEIVE => {
            let mut reader = atom.body_reader();
            let sender = decode_user_info(&mut reader)?;
            let block = TlvBlock::decode(reader.rest())?;
            let Some(text) = block.bytes(tlv_type::MESSAGE_TEXT) else {
                bail!("Message from {:?} without a text block", sender.screen_name);
            };
            let (encoding, bytes) = split_text_block(text)?;
            Ok(Some(ServerAtom::MessageReceived(IncomingMessage {
                sender,
                encoding,
                bytes,
                wants_ack: block.has(tlv_type::REQUEST_ACK),
            })))
        }
        messaging::ACK => {
            let mut reader = atom.body_reader();
            let name = reader.read_string8()?;
            Ok(Some(ServerAtom::MessageAcked {
                request_id: atom.request_id,
                screen_name: String::from_utf8_lossy(name).into_owned(),
            }))
        }
        messaging::ERROR => {
            let mut reader = atom.body_reader();
            let code = reader.read_u16()?;
            Ok(Some(ServerAtom::MessageFailed { request_id: atom.request_id, code }))
        }
        messaging::TYPING => {
            let mut reader = atom.body_reader();
            let name = reader.read_string8()?.to_vec();
            let code = reader.read_u16()?;
            let Some(state) = TypingState::from_code(code) else {
                bail!("Unknown typing state 0x{code:04X}");
            };
            Ok(Some(ServerAtom::TypingNotice {
                screen_name: String::from_utf8_lossy(&name).into_owned(),
                state,
            }))
        }
        _ => Ok(None),
    }
}

/// Outbound instant message.
pub fn encode_send(recipient: &str, text: &OutboundText, want_ack: bool, request_id: u16) -> Atom {
    let name = recipient.as_bytes();
    let mut body = Vec::with_capacity(1 + name.len() + 8 + text.bytes.len());
    body.push(name.len() as u8);
    body.extend_from_slice(name);
    tlv::put_tlv(
        &mut body,
        tlv_type::MESSAGE_TEXT,
        &encode_text_block(text.encoding.identifier(), &text.bytes),
    );
    if want_ack {
        tlv::put_tlv_empty(&mut body, tlv_type::REQUEST_ACK);
    }
    Atom::new(family::MESSAGING, messaging::SEND, request_id, body)
}

/// Outbound typing notification.
pub fn encode_typing(recipient: &str, state: TypingState, request_id: u16) -> Atom {
    let name = recipient.as_bytes();
    let mut body = Vec::with_capacity(1 + name.len() + 2);
    body.push(name.len() as u8);
    body.extend_from_slice(name);
    body.extend_from_slice(&state.code().to_be_bytes());
    Atom::new(family::MESSAGING, messaging::TYPING, request_id, body)
}

/// Encodes the wire text block: identifier then raw text bytes.
pub fn encode_text_block(encoding_id: &str, bytes: &[u8]) -> Vec<u8> {
    let id = encoding_id.as_bytes();
    let mut block = Vec::with_capacity(1 + id.len() + bytes.len());
    block.push(id.len() as u8);
    block.extend_from_slice(id);
    block.extend_from_slice(bytes);
    block
}

/// Splits a wire text block into its declared encoding and text bytes. A
/// zero-length identifier means the sender declared nothing.
pub fn split_text_block(block: &[u8]) -> Result<(Option<String>, Vec<u8>)> {
    let mut reader = ByteReader::new(block);
    let id = reader.read_string8()?;
    let encoding = if id.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(id).into_owned())
    };
    Ok((encoding, reader.rest().to_vec()))
}

/// Server-side encoding of an inbound message, for scripted peers.
pub fn encode_receive(
    sender: &UserInfo,
    encoding_id: Option<&str>,
    bytes: &[u8],
    wants_ack: bool,
) -> Vec<u8> {
    let mut body = encode_user_info(sender);
    tlv::put_tlv(
        &mut body,
        tlv_type::MESSAGE_TEXT,
        &encode_text_block(encoding_id.unwrap_or(""), bytes),
    );
    if wants_ack {
        tlv::put_tlv_empty(&mut body, tlv_type::REQUEST_ACK);
    }
    body
}

/// Human-readable reason for a bounced message, from the fixed code
/// table. Unmapped codes fall back to a generic reason.
pub fn failure_reason(code: u16) -> &'static str {
    match code {
        0x0000 => "Invalid error",
        0x0001 => "Invalid atom",
        0x0002 => "Rate to host",
        0x0003 => "Rate to client",
        0x0004 => "Not logged in",
        0x0005 => "Service unavailable",
        0x0006 => "Service not defined",
        0x0007 => "Obsolete atom",
        0x0008 => "Not supported by host",
        0x0009 => "Not supported by client",
        0x000A => "Refused by client",
        0x000B => "Reply too big",
        0x000C => "Responses lost",
        0x000D => "Request denied",
        0x000E => "Busted payload",
        0x000F => "Insufficient rights",
        0x0010 => "In local permit/deny",
        0x0011 => "Too evil (sender)",
        0x0012 => "Too evil (receiver)",
        0x0013 => "User temporarily unavailable",
        0x0014 => "No match",
        0x0015 => "List overflow",
        0x0016 => "Request ambiguous",
        0x0017 => "Queue full",
        0x0018 => "Not while on AOL",
        _ => "Unknown reason",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::WireEncoding;

    fn outbound(text: &str) -> OutboundText {
        crate::encoding::encode_outgoing(text).unwrap()
    }

    #[test]
    fn test_send_then_receive_shape() {
        let atom = encode_send("bob", &outbound("hi there"), true, 41);
        assert_eq!(atom.family, family::MESSAGING);
        assert_eq!(atom.request_id, 41);

        // Reinterpret the recipient prefix as a minimal sender block to
        // confirm the text TLV layout.
        let mut reader = atom.body_reader();
        assert_eq!(reader.read_string8().unwrap(), b"bob");
        let block = TlvBlock::decode(reader.rest()).unwrap();
        let (encoding, bytes) = split_text_block(block.bytes(tlv_type::MESSAGE_TEXT).unwrap()).unwrap();
        assert_eq!(encoding.as_deref(), Some(WireEncoding::Ascii.identifier()));
        assert_eq!(bytes, b"hi there");
        assert!(block.has(tlv_type::REQUEST_ACK));
    }

    #[test]
    fn test_receive_decodes_sender_and_text() {
        let body = encode_receive(&UserInfo::named("alice"), Some("iso-8859-1"), &[0xE9], false);
        let atom = Atom::new(family::MESSAGING, messaging::RECEIVE, 0, body);
        match decode(&atom).unwrap() {
            Some(ServerAtom::MessageReceived(msg)) => {
                assert_eq!(msg.sender.screen_name, "alice");
                assert_eq!(msg.encoding.as_deref(), Some("iso-8859-1"));
                assert_eq!(msg.bytes, vec![0xE9]);
                assert!(!msg.wants_ack);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_empty_identifier_decodes_as_undeclared() {
        let (encoding, bytes) = split_text_block(&encode_text_block("", b"plain")).unwrap();
        assert_eq!(encoding, None);
        assert_eq!(bytes, b"plain");
    }

    #[test]
    fn test_typing_round_trip() {
        let atom = encode_typing("carol", TypingState::Typing, 0);
        match decode(&atom).unwrap() {
            Some(ServerAtom::TypingNotice { screen_name, state }) => {
                assert_eq!(screen_name, "carol");
                assert_eq!(state, TypingState::Typing);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_error_carries_request_id() {
        let atom = Atom::new(family::MESSAGING, messaging::ERROR, 17, vec![0x00, 0x10]);
        match decode(&atom).unwrap() {
            Some(ServerAtom::MessageFailed { request_id, code }) => {
                assert_eq!(request_id, 17);
                assert_eq!(failure_reason(code), "In local permit/deny");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_failure_code_has_fallback() {
        assert_eq!(failure_reason(0x7777), "Unknown reason");
    }
}
