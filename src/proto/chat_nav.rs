//! Chat navigation: room creation brokering.
//!
//! Rooms are created through the navigation connection, which replies
//! with the fully-qualified descriptor the session then presents in a
//! chat service request.

use anyhow::Result;

use crate::codec::atom::Atom;
use crate::codec::tlv::{self, TlvBlock};
use crate::constants::{chat_nav, family, tlv as tlv_type};

use super::service::RoomDescriptor;
use super::ServerAtom;

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        chat_nav::INFO_REPLY => {
            let block = TlvBlock::decode(&atom.body)?;
            // Room replies and rights replies share a subtype; a room
            // name distinguishes them.
            if let Some(name) = block.string(tlv_type::ROOM_NAME) {
                let exchange = block.u16(tlv_type::ROOM_EXCHANGE).unwrap_or(0);
                let instance = block.u16(tlv_type::ROOM_INSTANCE).unwrap_or(0);
                Ok(Some(ServerAtom::RoomInfo(RoomDescriptor { exchange, name, instance })))
            } else {
                let max_rooms = block.u16(tlv_type::MAX_ROOMS).unwrap_or(u16::MAX);
                Ok(Some(ServerAtom::ChatNavRights { max_rooms }))
            }
        }
        chat_nav::ERROR => super::service::decode_family_error(atom).map(Some),
        _ => Ok(None),
    }
}

pub fn encode_rights_request(request_id: u16) -> Atom {
    Atom::new(family::CHAT_NAV, chat_nav::RIGHTS_REQUEST, request_id, Vec::new())
}

/// Create (or resolve) a room on an exchange.
pub fn encode_create_room(exchange: u16, name: &str, request_id: u16) -> Atom {
    let mut body = Vec::new();
    body.extend_from_slice(&exchange.to_be_bytes());
    body.extend_from_slice(&(name.len() as u16).to_be_bytes());
    body.extend_from_slice(name.as_bytes());
    Atom::new(family::CHAT_NAV, chat_nav::CREATE_ROOM, request_id, body)
}

/// Server-side room reply payload, for scripted peers.
pub fn encode_room_reply(room: &RoomDescriptor) -> Vec<u8> {
    let mut body = Vec::new();
    tlv::put_tlv_str(&mut body, tlv_type::ROOM_NAME, &room.name);
    tlv::put_tlv_u16(&mut body, tlv_type::ROOM_EXCHANGE, room.exchange);
    tlv::put_tlv_u16(&mut body, tlv_type::ROOM_INSTANCE, room.instance);
    body
}

/// Server-side rights reply payload, for scripted peers.
pub fn encode_rights_reply(max_rooms: u16) -> Vec<u8> {
    let mut body = Vec::new();
    tlv::put_tlv_u16(&mut body, tlv_type::MAX_ROOMS, max_rooms);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_with_room_decodes_as_room_info() {
        let room = RoomDescriptor { exchange: 4, name: "lobby".to_string(), instance: 1 };
        let atom = Atom::new(family::CHAT_NAV, chat_nav::INFO_REPLY, 0, encode_room_reply(&room));
        match decode(&atom).unwrap() {
            Some(ServerAtom::RoomInfo(got)) => assert_eq!(got, room),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_reply_without_room_decodes_as_rights() {
        let atom = Atom::new(family::CHAT_NAV, chat_nav::INFO_REPLY, 0, encode_rights_reply(10));
        match decode(&atom).unwrap() {
            Some(ServerAtom::ChatNavRights { max_rooms }) => assert_eq!(max_rooms, 10),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
