//! Server-side contact list wire format.
//!
//! Item encoding, identical in list payloads and every edit operation:
//!
//! ```text
//! [u16 group id] [u16 item id] [u16 item type] [u16 name length] [name]
//! [u16 attr length] [attrs as TLVs]
//! ```
//!
//! Groups have item id zero; contacts carry their parent's group id. The
//! attribute block holds alias, comment, the awaiting-authorization flag,
//! and the presence bit flags, plus whatever server-private attributes
//! arrive, which are preserved and echoed back untouched on modify.

use anyhow::{Context, Result};

use crate::codec::atom::Atom;
use crate::codec::tlv::TlvBlock;
use crate::codec::ByteReader;
use crate::constants::{family, item_attr, item_type, ssi, tlv as tlv_type};

use super::ServerAtom;

/// One contact-list item as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsiItem {
    pub group_id: u16,
    pub item_id: u16,
    pub item_type: u16,
    pub name: String,
    pub attrs: TlvBlock,
}

impl SsiItem {
    /// A contact inside a group.
    pub fn contact(group_id: u16, item_id: u16, name: &str) -> Self {
        Self::plain(group_id, item_id, item_type::CONTACT, name)
    }

    /// A group. Groups live at item id zero within their own group id.
    pub fn group(group_id: u16, name: &str) -> Self {
        Self::plain(group_id, 0, item_type::GROUP, name)
    }

    /// A permit-list entry.
    pub fn permit(item_id: u16, name: &str) -> Self {
        Self::plain(0, item_id, item_type::PERMIT, name)
    }

    /// A deny-list entry.
    pub fn deny(item_id: u16, name: &str) -> Self {
        Self::plain(0, item_id, item_type::DENY, name)
    }

    /// The presence-settings singleton.
    pub fn presence(item_id: u16, flags: u32) -> Self {
        let mut item = Self::plain(0, item_id, item_type::PRESENCE, "");
        item.set_presence_flags(flags);
        item
    }

    fn plain(group_id: u16, item_id: u16, item_type: u16, name: &str) -> Self {
        Self {
            group_id,
            item_id,
            item_type,
            name: name.to_string(),
            attrs: TlvBlock::default(),
        }
    }

    pub fn alias(&self) -> Option<String> {
        self.attrs.string(item_attr::ALIAS)
    }

    pub fn set_alias(&mut self, alias: Option<&str>) {
        match alias {
            Some(alias) => self.attrs.set(item_attr::ALIAS, alias.as_bytes().to_vec()),
            None => self.attrs.remove(item_attr::ALIAS),
        }
    }

    pub fn comment(&self) -> Option<String> {
        self.attrs.string(item_attr::COMMENT)
    }

    pub fn awaiting_auth(&self) -> bool {
        self.attrs.has(item_attr::AWAITING_AUTH)
    }

    pub fn set_awaiting_auth(&mut self, awaiting: bool) {
        if awaiting {
            self.attrs.set(item_attr::AWAITING_AUTH, Vec::new());
        } else {
            self.attrs.remove(item_attr::AWAITING_AUTH);
        }
    }

    pub fn presence_flags(&self) -> Option<u32> {
        self.attrs.u32(item_attr::PRESENCE_FLAGS)
    }

    pub fn set_presence_flags(&mut self, flags: u32) {
        self.attrs.set(item_attr::PRESENCE_FLAGS, flags.to_be_bytes().to_vec());
    }

    /// Encodes this item into a buffer under assembly.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let attrs = self.attrs.encode();
        buf.extend_from_slice(&self.group_id.to_be_bytes());
        buf.extend_from_slice(&self.item_id.to_be_bytes());
        buf.extend_from_slice(&self.item_type.to_be_bytes());
        buf.extend_from_slice(&(self.name.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        buf.extend_from_slice(&attrs);
    }

    /// Decodes one item, leaving the reader positioned after it.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let group_id = reader.read_u16().context("Item group id")?;
        let item_id = reader.read_u16().context("Item id")?;
        let item_type = reader.read_u16().context("Item type")?;
        let name = reader.read_string16().context("Item name")?;
        let name = String::from_utf8_lossy(name).into_owned();
        let attr_bytes = reader.read_string16().context("Item attributes")?;
        let attrs = TlvBlock::decode(attr_bytes)
            .with_context(|| format!("Attributes of item {name:?}"))?;
        Ok(Self { group_id, item_id, item_type, name, attrs })
    }
}

/// Contact-list limits from the rights reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRights {
    pub max_items: u16,
}

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        ssi::RIGHTS_REPLY => {
            let block = TlvBlock::decode(&atom.body)?;
            let max_items = block.u16(tlv_type::MAX_LIST_ITEMS).unwrap_or(u16::MAX);
            Ok(Some(ServerAtom::SsiRights(ListRights { max_items })))
        }
        ssi::LIST => {
            let mut reader = atom.body_reader();
            let count = reader.read_u16()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(SsiItem::decode(&mut reader)?);
            }
            let more_follows = atom.flags & 0x0001 != 0;
            Ok(Some(ServerAtom::SsiList { items, more_follows }))
        }
        ssi::ACK => {
            let mut reader = atom.body_reader();
            let mut codes = Vec::with_capacity(reader.remaining() / 2);
            while reader.remaining() >= 2 {
                codes.push(reader.read_u16()?);
            }
            Ok(Some(ServerAtom::SsiAck { request_id: atom.request_id, codes }))
        }
        ssi::ERROR => {
            let mut reader = atom.body_reader();
            let code = reader.read_u16()?;
            Ok(Some(ServerAtom::SsiError { code }))
        }
        ssi::AUTH_REQUESTED => {
            let mut reader = atom.body_reader();
            let name = reader.read_string8()?.to_vec();
            let reason = if reader.remaining() >= 2 {
                let text = reader.read_string16()?;
                if text.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(text).into_owned())
                }
            } else {
                None
            };
            Ok(Some(ServerAtom::AuthRequested {
                screen_name: String::from_utf8_lossy(&name).into_owned(),
                reason,
            }))
        }
        _ => Ok(None),
    }
}

pub fn encode_rights_request(request_id: u16) -> Atom {
    Atom::new(family::SSI, ssi::RIGHTS_REQUEST, request_id, Vec::new())
}

pub fn encode_data_request(request_id: u16) -> Atom {
    Atom::new(family::SSI, ssi::DATA_REQUEST, request_id, Vec::new())
}

pub fn encode_activate(request_id: u16) -> Atom {
    Atom::new(family::SSI, ssi::ACTIVATE, request_id, Vec::new())
}

pub fn encode_add(items: &[SsiItem], request_id: u16) -> Atom {
    Atom::new(family::SSI, ssi::ADD, request_id, encode_items(items))
}

pub fn encode_modify(items: &[SsiItem], request_id: u16) -> Atom {
    Atom::new(family::SSI, ssi::MODIFY, request_id, encode_items(items))
}

pub fn encode_delete(items: &[SsiItem], request_id: u16) -> Atom {
    Atom::new(family::SSI, ssi::DELETE, request_id, encode_items(items))
}

/// Ask a contact to authorize being listed.
pub fn encode_auth_request(target: &str, message: &str, request_id: u16) -> Atom {
    let mut body = Vec::new();
    body.push(target.len() as u8);
    body.extend_from_slice(target.as_bytes());
    body.extend_from_slice(&(message.len() as u16).to_be_bytes());
    body.extend_from_slice(message.as_bytes());
    Atom::new(family::SSI, ssi::AUTH_REQUEST, request_id, body)
}

/// Answer a contact's authorization request.
pub fn encode_auth_reply(target: &str, grant: bool, request_id: u16) -> Atom {
    let mut body = Vec::new();
    body.push(target.len() as u8);
    body.extend_from_slice(target.as_bytes());
    body.push(u8::from(grant));
    Atom::new(family::SSI, ssi::AUTH_REPLY, request_id, body)
}

fn encode_items(items: &[SsiItem]) -> Vec<u8> {
    let mut body = Vec::new();
    for item in items {
        item.encode_into(&mut body);
    }
    body
}

/// Server-side list payload, for scripted peers.
pub fn encode_list(items: &[SsiItem]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(items.len() as u16).to_be_bytes());
    for item in items {
        item.encode_into(&mut body);
    }
    body
}

/// Server-side rights payload, for scripted peers.
pub fn encode_rights_reply(max_items: u16) -> Vec<u8> {
    let mut body = Vec::new();
    crate::codec::tlv::put_tlv_u16(&mut body, tlv_type::MAX_LIST_ITEMS, max_items);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_round_trip_with_attrs() {
        let mut item = SsiItem::contact(3, 17, "foo");
        item.set_alias(Some("Foo Fighter"));
        item.set_awaiting_auth(true);

        let mut buf = Vec::new();
        item.encode_into(&mut buf);
        let mut reader = ByteReader::new(&buf);
        let decoded = SsiItem::decode(&mut reader).unwrap();

        assert_eq!(decoded, item);
        assert_eq!(decoded.alias().as_deref(), Some("Foo Fighter"));
        assert!(decoded.awaiting_auth());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_item_field_order_is_group_item_type_name_attrs() {
        let item = SsiItem::contact(0x0102, 0x0304, "ab");
        let mut buf = Vec::new();
        item.encode_into(&mut buf);
        assert_eq!(
            buf,
            vec![
                0x01, 0x02, // group id
                0x03, 0x04, // item id
                0x00, 0x00, // contact type
                0x00, 0x02, b'a', b'b', // name
                0x00, 0x00, // empty attr block
            ]
        );
    }

    #[test]
    fn test_unknown_attrs_survive_round_trip() {
        let mut item = SsiItem::contact(1, 2, "keeper");
        item.attrs.push(0x7A7A, vec![9, 9, 9]);
        let mut buf = Vec::new();
        item.encode_into(&mut buf);
        let decoded = SsiItem::decode(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(decoded.attrs.bytes(0x7A7A), Some(&[9, 9, 9][..]));
    }

    #[test]
    fn test_list_decode_honors_count_and_flags() {
        let items = vec![SsiItem::group(3, "Friends"), SsiItem::contact(3, 5, "foo")];
        let mut atom = Atom::new(family::SSI, ssi::LIST, 0, encode_list(&items));
        atom.flags = 0x0001;
        match decode(&atom).unwrap() {
            Some(ServerAtom::SsiList { items: got, more_follows }) => {
                assert_eq!(got, items);
                assert!(more_follows);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_item_rejected() {
        let items = vec![SsiItem::contact(1, 2, "foo")];
        let mut body = encode_list(&items);
        body.truncate(body.len() - 1);
        let atom = Atom::new(family::SSI, ssi::LIST, 0, body);
        assert!(decode(&atom).is_err());
    }

    #[test]
    fn test_ack_codes() {
        let atom = Atom::new(family::SSI, ssi::ACK, 12, vec![0x00, 0x00, 0x00, 0x0E]);
        match decode(&atom).unwrap() {
            Some(ServerAtom::SsiAck { request_id, codes }) => {
                assert_eq!(request_id, 12);
                assert_eq!(codes, vec![0x0000, 0x000E]);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_auth_requested_with_reason() {
        let atom_body = {
            let mut b = Vec::new();
            b.push(3);
            b.extend_from_slice(b"bob");
            b.extend_from_slice(&6u16.to_be_bytes());
            b.extend_from_slice(b"please");
            b
        };
        let atom = Atom::new(family::SSI, ssi::AUTH_REQUESTED, 0, atom_body);
        match decode(&atom).unwrap() {
            Some(ServerAtom::AuthRequested { screen_name, reason }) => {
                assert_eq!(screen_name, "bob");
                assert_eq!(reason.as_deref(), Some("please"));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_presence_item_flags() {
        let item = SsiItem::presence(20, crate::constants::presence_flags::SHOW_IDLE);
        assert_eq!(item.presence_flags(), Some(0x0000_0400));
        assert_eq!(item.item_type, item_type::PRESENCE);
    }
}
