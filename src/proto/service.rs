//! Generic service family: handshake completion, redirects, rate limits.

use anyhow::{bail, Result};

use crate::codec::atom::Atom;
use crate::codec::tlv::{self, TlvBlock};
use crate::constants::{service, tlv as tlv_type};

use super::ServerAtom;

/// A redirect: open a connection of `service` at `host`, presenting
/// `cookie` in its hello. Chat redirects also carry the room to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Service id, matching the family number the connection will serve.
    pub service: u16,
    /// Target `host[:port]`; port defaults to the session's configured
    /// port when absent.
    pub host: String,
    /// Opaque handoff cookie, forwarded byte for byte.
    pub cookie: Vec<u8>,
    /// Server offers an encrypted transport at the target.
    pub encrypt: bool,
    /// Room to join after handshake, for chat redirects only.
    pub room: Option<RoomDescriptor>,
}

/// Fully-qualified room identity on an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDescriptor {
    pub exchange: u16,
    pub name: String,
    pub instance: u16,
}

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        service::HOST_READY => {
            let mut reader = atom.body_reader();
            let mut families = Vec::with_capacity(reader.remaining() / 2);
            while reader.remaining() >= 2 {
                families.push(reader.read_u16()?);
            }
            if reader.remaining() != 0 {
                bail!("Host-ready family list has a trailing odd byte");
            }
            Ok(Some(ServerAtom::HostReady { families }))
        }
        service::REDIRECT => Ok(Some(ServerAtom::Redirect(decode_redirect(&atom.body)?))),
        service::RATE_PARAMS => {
            let mut reader = atom.body_reader();
            let classes = reader.read_u16()?;
            Ok(Some(ServerAtom::RateParams { classes }))
        }
        service::ERROR => decode_family_error(atom).map(Some),
        _ => Ok(None),
    }
}

/// Shared decoder for the per-family error subtype: a bare u16 code.
pub(super) fn decode_family_error(atom: &Atom) -> Result<ServerAtom> {
    let mut reader = atom.body_reader();
    let code = reader.read_u16()?;
    Ok(ServerAtom::ServiceError { family: atom.family, code })
}

/// Decodes the TLV body shared by redirect atoms and successful sign-on
/// replies.
pub fn decode_redirect(body: &[u8]) -> Result<Redirect> {
    let block = TlvBlock::decode(body)?;
    let Some(service) = block.u16(tlv_type::SERVICE_ID) else {
        bail!("Redirect without a service id");
    };
    let Some(host) = block.string(tlv_type::HOST) else {
        bail!("Redirect without a host");
    };
    let Some(cookie) = block.bytes(tlv_type::COOKIE) else {
        bail!("Redirect without a cookie");
    };
    let encrypt = block
        .bytes(tlv_type::ENCRYPT)
        .is_some_and(|v| v.first().copied().unwrap_or(0) != 0);

    let room = match block.string(tlv_type::ROOM_NAME) {
        Some(name) => {
            let Some(exchange) = block.u16(tlv_type::ROOM_EXCHANGE) else {
                bail!("Chat redirect names room {name:?} but no exchange");
            };
            Some(RoomDescriptor {
                exchange,
                name,
                instance: block.u16(tlv_type::ROOM_INSTANCE).unwrap_or(0),
            })
        }
        None => None,
    };

    Ok(Redirect { service, host, cookie: cookie.to_vec(), encrypt, room })
}

/// Request a redirect to a secondary service. Chat requests carry the
/// room so the server can place the connection.
pub fn encode_service_request(service_id: u16, room: Option<&RoomDescriptor>, request_id: u16) -> Atom {
    let mut body = Vec::new();
    body.extend_from_slice(&service_id.to_be_bytes());
    if let Some(room) = room {
        put_room(&mut body, room);
    }
    Atom::new(crate::constants::family::SERVICE, service::SERVICE_REQUEST, request_id, body)
}

/// Acknowledge rate parameters by echoing each class id.
pub fn encode_rate_ack(classes: u16, request_id: u16) -> Atom {
    let mut body = Vec::with_capacity(classes as usize * 2);
    for class in 1..=classes {
        body.extend_from_slice(&class.to_be_bytes());
    }
    Atom::new(crate::constants::family::SERVICE, service::RATE_ACK, request_id, body)
}

/// Encodes a redirect body; the server side of [`decode_redirect`], used
/// by scripted peers in tests.
pub fn encode_redirect(redirect: &Redirect) -> Vec<u8> {
    let mut body = Vec::new();
    tlv::put_tlv_u16(&mut body, tlv_type::SERVICE_ID, redirect.service);
    tlv::put_tlv_str(&mut body, tlv_type::HOST, &redirect.host);
    tlv::put_tlv(&mut body, tlv_type::COOKIE, &redirect.cookie);
    if redirect.encrypt {
        tlv::put_tlv_u8(&mut body, tlv_type::ENCRYPT, 1);
    }
    if let Some(room) = &redirect.room {
        put_room(&mut body, room);
    }
    body
}

fn put_room(buf: &mut Vec<u8>, room: &RoomDescriptor) {
    tlv::put_tlv_str(buf, tlv_type::ROOM_NAME, &room.name);
    tlv::put_tlv_u16(buf, tlv_type::ROOM_EXCHANGE, room.exchange);
    tlv::put_tlv_u16(buf, tlv_type::ROOM_INSTANCE, room.instance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::family;

    #[test]
    fn test_host_ready_families() {
        let atom = Atom::new(
            family::SERVICE,
            service::HOST_READY,
            0,
            vec![0x00, 0x01, 0x00, 0x03, 0x00, 0x13],
        );
        match decode(&atom).unwrap() {
            Some(ServerAtom::HostReady { families }) => {
                assert_eq!(families, vec![0x0001, 0x0003, 0x0013]);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_redirect_round_trip() {
        let redirect = Redirect {
            service: family::CHAT,
            host: "chat.example.net:5190".to_string(),
            cookie: vec![0xAA, 0xBB, 0xCC],
            encrypt: true,
            room: Some(RoomDescriptor {
                exchange: 4,
                name: "lobby".to_string(),
                instance: 1,
            }),
        };
        let decoded = decode_redirect(&encode_redirect(&redirect)).unwrap();
        assert_eq!(decoded, redirect);
    }

    #[test]
    fn test_redirect_without_cookie_rejected() {
        let mut body = Vec::new();
        tlv::put_tlv_u16(&mut body, tlv_type::SERVICE_ID, 0x0001);
        tlv::put_tlv_str(&mut body, tlv_type::HOST, "host");
        assert!(decode_redirect(&body).is_err());
    }

    #[test]
    fn test_service_request_body() {
        let atom = encode_service_request(family::ICON, None, 9);
        assert_eq!(atom.subtype, service::SERVICE_REQUEST);
        assert_eq!(atom.request_id, 9);
        assert_eq!(atom.body, vec![0x00, 0x10]);
    }

    #[test]
    fn test_rate_ack_echoes_classes() {
        let atom = encode_rate_ack(3, 1);
        assert_eq!(atom.body, vec![0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);
    }
}
