//! Buddy icon transfer.
//!
//! Icons move over a dedicated connection. An upload carries the icon
//! bytes with their checksum; a fetch names the contact and the checksum
//! last seen in their user info, and the reply carries the image.

use anyhow::Result;

use crate::codec::atom::Atom;
use crate::constants::{family, icon};

use super::ServerAtom;

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        icon::UPLOAD_ACK => {
            let mut reader = atom.body_reader();
            let checksum = reader.read_u16()?;
            Ok(Some(ServerAtom::IconUploadAck { checksum }))
        }
        icon::REPLY => {
            let mut reader = atom.body_reader();
            let name = reader.read_string8()?.to_vec();
            let checksum = reader.read_u16()?;
            let data = reader.read_string16()?.to_vec();
            Ok(Some(ServerAtom::IconReply {
                screen_name: String::from_utf8_lossy(&name).into_owned(),
                checksum,
                data,
            }))
        }
        icon::ERROR => super::service::decode_family_error(atom).map(Some),
        _ => Ok(None),
    }
}

/// Uploads the local account's icon. The session refuses images over
/// [`MAX_ICON_BYTES`](crate::constants::MAX_ICON_BYTES) before building
/// this atom, keeping the length prefix inside its u16.
pub fn encode_upload(data: &[u8], request_id: u16) -> Atom {
    let mut body = Vec::with_capacity(4 + data.len());
    body.extend_from_slice(&icon_checksum(data).to_be_bytes());
    body.extend_from_slice(&(data.len() as u16).to_be_bytes());
    body.extend_from_slice(data);
    Atom::new(family::ICON, icon::UPLOAD, request_id, body)
}

/// Fetches a contact's icon by the checksum advertised in their user
/// info.
pub fn encode_request(screen_name: &str, checksum: u16, request_id: u16) -> Atom {
    let name = screen_name.as_bytes();
    let mut body = Vec::with_capacity(3 + name.len());
    body.push(name.len() as u8);
    body.extend_from_slice(name);
    body.extend_from_slice(&checksum.to_be_bytes());
    Atom::new(family::ICON, icon::REQUEST, request_id, body)
}

/// 16-bit icon checksum: little-endian word sum with carry folding, as
/// legacy clients computed it.
pub fn icon_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum = sum.wrapping_add(u32::from(u16::from_le_bytes([pair[0], pair[1]])));
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(*last));
    }
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum as u16
}

/// Server-side reply payload, for scripted peers.
pub fn encode_reply(screen_name: &str, checksum: u16, data: &[u8]) -> Vec<u8> {
    let name = screen_name.as_bytes();
    let mut body = Vec::with_capacity(5 + name.len() + data.len());
    body.push(name.len() as u8);
    body.extend_from_slice(name);
    body.extend_from_slice(&checksum.to_be_bytes());
    body.extend_from_slice(&(data.len() as u16).to_be_bytes());
    body.extend_from_slice(data);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_stable_and_input_sensitive() {
        let a = icon_checksum(&[1, 2, 3, 4, 5]);
        assert_eq!(a, icon_checksum(&[1, 2, 3, 4, 5]));
        assert_ne!(a, icon_checksum(&[1, 2, 3, 4, 6]));
    }

    #[test]
    fn test_checksum_folds_carries() {
        // All-ones input overflows 16 bits many times over.
        let data = vec![0xFF; 1024];
        let sum = icon_checksum(&data);
        assert!(sum > 0);
    }

    #[test]
    fn test_upload_embeds_checksum_and_length() {
        let data = [9u8, 8, 7];
        let atom = encode_upload(&data, 6);
        let mut reader = atom.body_reader();
        assert_eq!(reader.read_u16().unwrap(), icon_checksum(&data));
        assert_eq!(reader.read_string16().unwrap(), &data);
    }

    #[test]
    fn test_reply_round_trip() {
        let body = encode_reply("alice", 0x1234, &[0xCA, 0xFE]);
        let atom = Atom::new(family::ICON, icon::REPLY, 0, body);
        match decode(&atom).unwrap() {
            Some(ServerAtom::IconReply { screen_name, checksum, data }) => {
                assert_eq!(screen_name, "alice");
                assert_eq!(checksum, 0x1234);
                assert_eq!(data, vec![0xCA, 0xFE]);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
