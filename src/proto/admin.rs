//! Account administration operations.
//!
//! These run on a dedicated connection the session opens on first use;
//! requests issued before it exists are queued and flushed when its
//! handshake completes.

use anyhow::Result;

use crate::codec::atom::Atom;
use crate::codec::tlv::{self, TlvBlock};
use crate::constants::{admin, family, tlv as tlv_type};

use super::ServerAtom;

/// One administrative request, queued until the admin connection is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminRequest {
    ChangePassword { old: String, new: String },
    SetEmail(String),
    QueryEmail,
    /// Re-case or re-space the screen name; the server enforces that it
    /// still normalizes to the same identity.
    FormatScreenName(String),
}

pub(super) fn decode(atom: &Atom) -> Result<Option<ServerAtom>> {
    match atom.subtype {
        admin::INFO_REPLY => {
            let block = TlvBlock::decode(&atom.body)?;
            Ok(Some(ServerAtom::AdminInfoReply { email: block.string(tlv_type::EMAIL) }))
        }
        admin::CHANGE_REPLY => {
            let block = TlvBlock::decode(&atom.body)?;
            let error_code = block.u16(tlv_type::ERROR_CODE);
            Ok(Some(ServerAtom::AdminChangeReply { ok: error_code.is_none(), error_code }))
        }
        admin::ERROR => super::service::decode_family_error(atom).map(Some),
        _ => Ok(None),
    }
}

/// Encodes one queued request as its wire atom.
pub fn encode_request(request: &AdminRequest, request_id: u16) -> Atom {
    match request {
        AdminRequest::ChangePassword { old, new } => {
            let mut body = Vec::new();
            tlv::put_tlv_str(&mut body, tlv_type::OLD_PASSWORD, old);
            tlv::put_tlv_str(&mut body, tlv_type::NEW_PASSWORD, new);
            Atom::new(family::ADMIN, admin::CHANGE_REQUEST, request_id, body)
        }
        AdminRequest::SetEmail(email) => {
            let mut body = Vec::new();
            tlv::put_tlv_str(&mut body, tlv_type::EMAIL, email);
            Atom::new(family::ADMIN, admin::CHANGE_REQUEST, request_id, body)
        }
        AdminRequest::QueryEmail => {
            Atom::new(family::ADMIN, admin::INFO_QUERY, request_id, Vec::new())
        }
        AdminRequest::FormatScreenName(name) => {
            let mut body = Vec::new();
            tlv::put_tlv_str(&mut body, tlv_type::FORMATTED_NAME, name);
            Atom::new(family::ADMIN, admin::CHANGE_REQUEST, request_id, body)
        }
    }
}
