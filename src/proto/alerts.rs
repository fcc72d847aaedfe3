//! Mail alerts.

use anyhow::Result;

use crate::codec::atom::Atom;
use crate::constants::{alerts, family};

use super::ServerAtom;

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        alerts::MAIL_STATUS => {
            let mut reader = atom.body_reader();
            let unread_count = reader.read_u16()?;
            Ok(Some(ServerAtom::MailStatus { unread_count }))
        }
        _ => Ok(None),
    }
}

/// Presents stored mail cookies so the server scopes alerts to this
/// account's mailboxes. Clients with no stored cookies send none.
pub fn encode_mail_cookies(cookies: &[Vec<u8>], request_id: u16) -> Atom {
    let mut body = Vec::new();
    body.extend_from_slice(&(cookies.len() as u16).to_be_bytes());
    for cookie in cookies {
        body.extend_from_slice(&(cookie.len() as u16).to_be_bytes());
        body.extend_from_slice(cookie);
    }
    Atom::new(family::ALERTS, alerts::MAIL_COOKIES, request_id, body)
}

/// Turns alert delivery on for this connection.
pub fn encode_activate(request_id: u16) -> Atom {
    Atom::new(family::ALERTS, alerts::ACTIVATE, request_id, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mail_status_count() {
        let atom = Atom::new(family::ALERTS, alerts::MAIL_STATUS, 0, vec![0x00, 0x03]);
        match decode(&atom).unwrap() {
            Some(ServerAtom::MailStatus { unread_count }) => assert_eq!(unread_count, 3),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_empty_cookie_presentation() {
        let atom = encode_mail_cookies(&[], 4);
        assert_eq!(atom.body, vec![0x00, 0x00]);
    }

    #[test]
    fn test_cookie_lengths_prefixing() {
        let atom = encode_mail_cookies(&[vec![0xAB, 0xCD]], 4);
        assert_eq!(atom.body, vec![0x00, 0x01, 0x00, 0x02, 0xAB, 0xCD]);
    }
}
