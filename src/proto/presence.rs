//! Contact presence notifications.

use anyhow::Result;

use crate::codec::atom::Atom;
use crate::constants::presence;

use super::{decode_user_info, ServerAtom};

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        presence::ARRIVED => {
            let mut reader = atom.body_reader();
            let info = decode_user_info(&mut reader)?;
            Ok(Some(ServerAtom::BuddyArrived(info)))
        }
        presence::DEPARTED => {
            // Departure bodies are full user info blocks; only the name
            // is meaningful once the contact is gone.
            let mut reader = atom.body_reader();
            let info = decode_user_info(&mut reader)?;
            Ok(Some(ServerAtom::BuddyDeparted { screen_name: info.screen_name }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::family;
    use crate::proto::{encode_user_info, UserInfo};

    #[test]
    fn test_arrival_carries_capabilities() {
        let mut info = UserInfo::named("alice");
        info.caps = crate::constants::caps::TYPING;
        let atom = Atom::new(family::PRESENCE, presence::ARRIVED, 0, encode_user_info(&info));
        match decode(&atom).unwrap() {
            Some(ServerAtom::BuddyArrived(got)) => {
                assert_eq!(got.screen_name, "alice");
                assert!(got.supports_typing());
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_departure_reduces_to_name() {
        let atom = Atom::new(
            family::PRESENCE,
            presence::DEPARTED,
            0,
            encode_user_info(&UserInfo::named("bob")),
        );
        match decode(&atom).unwrap() {
            Some(ServerAtom::BuddyDeparted { screen_name }) => assert_eq!(screen_name, "bob"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
