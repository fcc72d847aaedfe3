//! Credential exchange.
//!
//! Sign-on is a four-step dance on a dedicated connection: request a
//! challenge key, receive it, send the digested credentials, receive
//! either a redirect to the primary host or an error code. A zero-length
//! key means the server cannot do digests and the password would travel
//! in the clear; the session asks the user before proceeding.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::codec::atom::Atom;
use crate::codec::tlv::{self, TlvBlock};
use crate::constants::{auth, family, tlv as tlv_type};
use crate::error::SignOnError;

use super::{ServerAtom, SignOnOutcome};

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        auth::KEY_REPLY => {
            let mut reader = atom.body_reader();
            let key = reader.read_string16()?.to_vec();
            Ok(Some(ServerAtom::AuthKey { key }))
        }
        auth::LOGIN_REPLY => {
            let block = TlvBlock::decode(&atom.body)?;
            Ok(Some(ServerAtom::SignOnReply(SignOnOutcome {
                screen_name: block.string(tlv_type::SCREEN_NAME),
                host: block.string(tlv_type::HOST),
                cookie: block.bytes(tlv_type::COOKIE).map(<[u8]>::to_vec),
                error: block.u16(tlv_type::ERROR_CODE).map(SignOnError::from_code),
            })))
        }
        _ => Ok(None),
    }
}

/// First sign-on atom: ask for the digest challenge key.
pub fn encode_key_request(screen_name: &str, request_id: u16) -> Atom {
    let mut body = Vec::new();
    tlv::put_tlv_str(&mut body, tlv_type::SCREEN_NAME, screen_name);
    Atom::new(family::AUTH, auth::KEY_REQUEST, request_id, body)
}

/// Digests credentials with the server's challenge key.
pub fn digest_credentials(key: &[u8], password: &str, client_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(password.as_bytes());
    hasher.update(client_id.as_bytes());
    hasher.finalize().to_vec()
}

/// Sign-on request carrying digested credentials.
pub fn encode_login(screen_name: &str, digest: &[u8], client_id: &str, request_id: u16) -> Atom {
    let mut body = Vec::new();
    tlv::put_tlv_str(&mut body, tlv_type::SCREEN_NAME, screen_name);
    tlv::put_tlv(&mut body, tlv_type::PASSWORD_DIGEST, digest);
    tlv::put_tlv_str(&mut body, tlv_type::CLIENT_ID, client_id);
    Atom::new(family::AUTH, auth::LOGIN_REQUEST, request_id, body)
}

/// Sign-on request carrying the password in the clear, used only against
/// plaintext-only servers and only after the user agreed.
pub fn encode_login_plaintext(
    screen_name: &str,
    password: &str,
    client_id: &str,
    request_id: u16,
) -> Atom {
    let mut body = Vec::new();
    tlv::put_tlv_str(&mut body, tlv_type::SCREEN_NAME, screen_name);
    tlv::put_tlv_str(&mut body, tlv_type::PASSWORD_PLAIN, password);
    tlv::put_tlv_str(&mut body, tlv_type::CLIENT_ID, client_id);
    Atom::new(family::AUTH, auth::LOGIN_REQUEST, request_id, body)
}
