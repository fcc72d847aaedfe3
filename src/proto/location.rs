//! Own location info: away message publication.
//!
//! The set-info body is a TLV block. The away TLV carries a wire text
//! block like a message does; an empty away TLV clears the message.

use crate::codec::atom::Atom;
use crate::codec::tlv;
use crate::constants::{family, location, tlv as tlv_type};
use crate::encoding::OutboundText;

use super::icbm::encode_text_block;

/// Publishes (or with `None` clears) the account's away message.
pub fn encode_set_away(text: Option<&OutboundText>, request_id: u16) -> Atom {
    let mut body = Vec::new();
    match text {
        Some(out) => tlv::put_tlv(
            &mut body,
            tlv_type::AWAY_TEXT,
            &encode_text_block(out.encoding.identifier(), &out.bytes),
        ),
        None => tlv::put_tlv_empty(&mut body, tlv_type::AWAY_TEXT),
    }
    Atom::new(family::LOCATION, location::SET_INFO, request_id, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tlv::TlvBlock;
    use crate::encoding::{encode_outgoing, WireEncoding};
    use crate::proto::icbm::split_text_block;

    #[test]
    fn test_set_away_carries_encoded_text() {
        let out = encode_outgoing("gone fishing").unwrap();
        let atom = encode_set_away(Some(&out), 9);
        assert_eq!(atom.family, family::LOCATION);
        assert_eq!(atom.subtype, location::SET_INFO);

        let block = TlvBlock::decode(&atom.body).unwrap();
        let (encoding, bytes) = split_text_block(block.bytes(tlv_type::AWAY_TEXT).unwrap()).unwrap();
        assert_eq!(encoding.as_deref(), Some(WireEncoding::Ascii.identifier()));
        assert_eq!(bytes, b"gone fishing");
    }

    #[test]
    fn test_clearing_sends_an_empty_away_tlv() {
        let atom = encode_set_away(None, 10);
        let block = TlvBlock::decode(&atom.body).unwrap();
        assert_eq!(block.bytes(tlv_type::AWAY_TEXT), Some(&[][..]));
    }
}
