//! Chat room traffic, carried on per-room connections.

use anyhow::{bail, Result};

use crate::codec::atom::Atom;
use crate::codec::tlv::{self, TlvBlock};
use crate::constants::{chat, family, tlv as tlv_type};
use crate::encoding::OutboundText;

use super::service::RoomDescriptor;
use super::{decode_user_info, encode_user_info, ServerAtom, UserInfo};

/// A decoded inbound room message, text still in wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRoomMessage {
    pub sender: UserInfo,
    pub encoding: Option<String>,
    pub bytes: Vec<u8>,
}

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        chat::USERS_JOINED => Ok(Some(ServerAtom::ChatUsersJoined { users: decode_users(atom)? })),
        chat::USERS_LEFT => Ok(Some(ServerAtom::ChatUsersLeft { users: decode_users(atom)? })),
        chat::MESSAGE => {
            let mut reader = atom.body_reader();
            let sender = decode_user_info(&mut reader)?;
            let block = TlvBlock::decode(reader.rest())?;
            let Some(text) = block.bytes(tlv_type::MESSAGE_TEXT) else {
                bail!("Room message from {:?} without a text block", sender.screen_name);
            };
            let (encoding, bytes) = super::icbm::split_text_block(text)?;
            Ok(Some(ServerAtom::ChatMessageReceived(IncomingRoomMessage {
                sender,
                encoding,
                bytes,
            })))
        }
        chat::ERROR => super::service::decode_family_error(atom).map(Some),
        _ => Ok(None),
    }
}

fn decode_users(atom: &Atom) -> Result<Vec<UserInfo>> {
    let mut reader = atom.body_reader();
    let mut users = Vec::new();
    while reader.remaining() > 0 {
        users.push(decode_user_info(&mut reader)?);
    }
    Ok(users)
}

/// Join the room this connection was redirected for.
pub fn encode_join(room: &RoomDescriptor, request_id: u16) -> Atom {
    let mut body = Vec::new();
    body.extend_from_slice(&room.exchange.to_be_bytes());
    body.extend_from_slice(&(room.name.len() as u16).to_be_bytes());
    body.extend_from_slice(room.name.as_bytes());
    body.extend_from_slice(&room.instance.to_be_bytes());
    Atom::new(family::CHAT, chat::JOIN, request_id, body)
}

/// A message to the room.
pub fn encode_message(text: &OutboundText, request_id: u16) -> Atom {
    let mut body = Vec::new();
    tlv::put_tlv(
        &mut body,
        tlv_type::MESSAGE_TEXT,
        &super::icbm::encode_text_block(text.encoding.identifier(), &text.bytes),
    );
    Atom::new(family::CHAT, chat::MESSAGE, request_id, body)
}

/// Server-side roster payload, for scripted peers.
pub fn encode_users(users: &[UserInfo]) -> Vec<u8> {
    let mut body = Vec::new();
    for user in users {
        body.extend_from_slice(&encode_user_info(user));
    }
    body
}

/// Server-side room message payload, for scripted peers.
pub fn encode_room_message(sender: &UserInfo, encoding_id: Option<&str>, bytes: &[u8]) -> Vec<u8> {
    let mut body = encode_user_info(sender);
    tlv::put_tlv(
        &mut body,
        tlv_type::MESSAGE_TEXT,
        &super::icbm::encode_text_block(encoding_id.unwrap_or(""), bytes),
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_decode() {
        let users = vec![UserInfo::named("a"), UserInfo::named("b")];
        let atom = Atom::new(family::CHAT, chat::USERS_JOINED, 0, encode_users(&users));
        match decode(&atom).unwrap() {
            Some(ServerAtom::ChatUsersJoined { users: got }) => {
                assert_eq!(got.len(), 2);
                assert_eq!(got[1].screen_name, "b");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_room_message_round_trip() {
        let body = encode_room_message(&UserInfo::named("carol"), Some("us-ascii"), b"hey all");
        let atom = Atom::new(family::CHAT, chat::MESSAGE, 0, body);
        match decode(&atom).unwrap() {
            Some(ServerAtom::ChatMessageReceived(msg)) => {
                assert_eq!(msg.sender.screen_name, "carol");
                assert_eq!(msg.bytes, b"hey all");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_join_body_layout() {
        let room = RoomDescriptor { exchange: 4, name: "ab".to_string(), instance: 2 };
        let atom = encode_join(&room, 3);
        assert_eq!(atom.body, vec![0x00, 0x04, 0x00, 0x02, b'a', b'b', 0x00, 0x02]);
    }
}
