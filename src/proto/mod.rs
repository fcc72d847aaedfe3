//! Protocol families: typed payloads and their atom codecs.
//!
//! Each submodule owns one family: builders for client atoms and decoders
//! for server atoms. Every server atom this crate handles decodes into
//! one [`ServerAtom`] variant carrying a typed payload; the session
//! matches exhaustively on the result, so adding a handled subtype means
//! adding a variant and the compiler finds every dispatch site.
//!
//! Unhandled (family, subtype) pairs decode to `None` and are skipped:
//! servers routinely send atoms newer than the client.

pub mod admin;
pub mod alerts;
pub mod auth;
pub mod chat;
pub mod chat_nav;
pub mod icbm;
pub mod icon;
pub mod location;
pub mod presence;
pub mod service;
pub mod ssi;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};

use crate::codec::atom::Atom;
use crate::codec::tlv::{self, TlvBlock};
use crate::codec::ByteReader;
use crate::constants::{family, tlv as tlv_type};
use crate::error::SignOnError;

pub use self::icbm::TypingState;
pub use self::service::{Redirect, RoomDescriptor};
pub use self::ssi::SsiItem;

/// Every server atom the session handles, decoded to a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerAtom {
    // ── service ──────────────────────────────────────────────────────
    /// Handshake finished on this connection; listed families are live.
    HostReady { families: Vec<u16> },
    /// Open a new connection of the named service at another host.
    Redirect(Redirect),
    /// Rate limit parameters; acknowledged and otherwise ignored.
    RateParams { classes: u16 },
    /// Family-scoped error on a family without a dedicated error shape.
    ServiceError { family: u16, code: u16 },

    // ── presence ─────────────────────────────────────────────────────
    /// A contact signed on or changed state.
    BuddyArrived(UserInfo),
    /// A contact signed off.
    BuddyDeparted { screen_name: String },

    // ── messaging ────────────────────────────────────────────────────
    /// An instant message arrived.
    MessageReceived(icbm::IncomingMessage),
    /// The server acknowledged delivery of an outbound message.
    MessageAcked { request_id: u16, screen_name: String },
    /// A previously sent message bounced.
    MessageFailed { request_id: u16, code: u16 },
    /// A contact's typing state changed.
    TypingNotice { screen_name: String, state: TypingState },

    // ── admin ────────────────────────────────────────────────────────
    /// Reply to an account info query.
    AdminInfoReply { email: Option<String> },
    /// Reply to an account change request.
    AdminChangeReply { ok: bool, error_code: Option<u16> },

    // ── chat navigation ──────────────────────────────────────────────
    /// Navigation rights granted.
    ChatNavRights { max_rooms: u16 },
    /// A room was created or resolved to its full descriptor.
    RoomInfo(RoomDescriptor),

    // ── chat ─────────────────────────────────────────────────────────
    /// Users present in or arriving at a room.
    ChatUsersJoined { users: Vec<UserInfo> },
    /// Users leaving a room.
    ChatUsersLeft { users: Vec<UserInfo> },
    /// A room message arrived.
    ChatMessageReceived(chat::IncomingRoomMessage),

    // ── icon ─────────────────────────────────────────────────────────
    /// Own icon upload accepted.
    IconUploadAck { checksum: u16 },
    /// A contact's icon data.
    IconReply { screen_name: String, checksum: u16, data: Vec<u8> },

    // ── contact list ─────────────────────────────────────────────────
    /// List rights and limits.
    SsiRights(ssi::ListRights),
    /// One chunk of the server list; more chunks follow when flagged.
    SsiList { items: Vec<SsiItem>, more_follows: bool },
    /// Per-item acknowledgement codes for one pending operation.
    SsiAck { request_id: u16, codes: Vec<u16> },
    /// Contact-list family error, notably the rate-limit code.
    SsiError { code: u16 },
    /// A contact asks us for authorization.
    AuthRequested { screen_name: String, reason: Option<String> },

    // ── auth ─────────────────────────────────────────────────────────
    /// Digest challenge key; zero-length means plaintext-only server.
    AuthKey { key: Vec<u8> },
    /// Sign-on outcome: redirect on success, error code on failure.
    SignOnReply(SignOnOutcome),

    // ── alerts ───────────────────────────────────────────────────────
    /// Mailbox status changed.
    MailStatus { unread_count: u16 },
}

/// Sign-on reply payload. Success carries the primary host and cookie in
/// the same TLV shape as a redirect; failure carries an error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOnOutcome {
    pub screen_name: Option<String>,
    pub host: Option<String>,
    pub cookie: Option<Vec<u8>>,
    pub error: Option<SignOnError>,
}

/// Decodes a server atom into its typed variant.
///
/// Returns `Ok(None)` for families or subtypes this client does not
/// handle.
///
/// # Errors
///
/// Returns an error when a handled atom's body is malformed; the
/// connection carrying it must be torn down.
pub fn decode_server_atom(atom: &Atom) -> Result<Option<ServerAtom>> {
    let decoded = match atom.family {
        family::SERVICE => service::decode(atom),
        family::PRESENCE => presence::decode(atom),
        family::MESSAGING => icbm::decode(atom),
        family::ADMIN => admin::decode(atom),
        family::CHAT_NAV => chat_nav::decode(atom),
        family::CHAT => chat::decode(atom),
        family::ICON => icon::decode(atom),
        family::SSI => ssi::decode(atom),
        family::AUTH => auth::decode(atom),
        family::ALERTS => alerts::decode(atom),
        _ => return Ok(None),
    };
    decoded.with_context(|| {
        format!(
            "Malformed atom 0x{:04X}/0x{:04X} ({} body bytes)",
            atom.family,
            atom.subtype,
            atom.body.len()
        )
    })
}

/// Normalizes a screen name for identity comparison: case folded with
/// spaces removed, the way legacy servers compare them.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != ' ')
        .flat_map(char::to_lowercase)
        .collect()
}

/// The session's request-id counter. Every acknowledgement-expecting atom
/// is stamped with a fresh id; replies correlate by id, not by arrival
/// order.
#[derive(Debug)]
pub struct RequestIds {
    current: u16,
}

impl RequestIds {
    pub fn new() -> Self {
        Self { current: 1 }
    }

    /// Returns the next id, wrapping past `u16::MAX` and skipping zero so
    /// unsolicited server atoms (id zero) never collide with a request.
    pub fn next_id(&mut self) -> u16 {
        let id = self.current;
        self.current = match self.current.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        id
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Icon metadata as carried in user info attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconInfo {
    pub checksum: u16,
    pub size: u32,
    pub stamp: u32,
}

/// A user info block: screen name, warning level, and attributes.
///
/// Wire shape, shared by presence notifications, message sender blocks,
/// and chat rosters:
///
/// ```text
/// [u8 name length][name][u16 warning level][u16 attr count][attrs as TLVs]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub screen_name: String,
    pub warning_level: u16,
    pub online_since: Option<DateTime<Utc>>,
    pub idle_minutes: Option<u16>,
    pub caps: u32,
    pub address: Option<u32>,
    pub icon_info: Option<IconInfo>,
}

impl UserInfo {
    /// A block with just a name, every attribute absent.
    pub fn named(screen_name: &str) -> Self {
        Self {
            screen_name: screen_name.to_string(),
            warning_level: 0,
            online_since: None,
            idle_minutes: None,
            caps: 0,
            address: None,
            icon_info: None,
        }
    }

    /// Whether the user advertises 16-bit-unit message support.
    pub fn supports_wide_text(&self) -> bool {
        self.caps & crate::constants::caps::WIDE_TEXT != 0
    }

    /// Whether the user advertises typing notifications.
    pub fn supports_typing(&self) -> bool {
        self.caps & crate::constants::caps::TYPING != 0
    }
}

/// Decodes one user info block, leaving the reader after it.
pub fn decode_user_info(reader: &mut ByteReader<'_>) -> Result<UserInfo> {
    let name = reader.read_string8().context("User info name")?;
    let screen_name = String::from_utf8_lossy(name).into_owned();
    let warning_level = reader.read_u16().context("User info warning level")?;
    let attr_count = reader.read_u16().context("User info attribute count")? as usize;
    let attrs = TlvBlock::decode_counted(reader, attr_count).context("User info attributes")?;

    let online_since = attrs
        .u32(tlv_type::ONLINE_SINCE)
        .and_then(|secs| Utc.timestamp_opt(i64::from(secs), 0).single());
    let icon_info = attrs.bytes(tlv_type::ICON_INFO).and_then(decode_icon_info);

    Ok(UserInfo {
        screen_name,
        warning_level,
        online_since,
        idle_minutes: attrs.u16(tlv_type::IDLE_MINUTES),
        caps: attrs.u32(tlv_type::CAPABILITIES).unwrap_or(0),
        address: attrs.u32(tlv_type::ADDRESS),
        icon_info,
    })
}

fn decode_icon_info(bytes: &[u8]) -> Option<IconInfo> {
    if bytes.len() != 10 {
        return None;
    }
    Some(IconInfo {
        checksum: u16::from_be_bytes([bytes[0], bytes[1]]),
        size: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        stamp: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
    })
}

/// Encodes a user info block. The inverse of [`decode_user_info`]; servers
/// send these, so outside tests this is only exercised by scripted peers.
pub fn encode_user_info(info: &UserInfo) -> Vec<u8> {
    let mut attrs = Vec::new();
    if let Some(at) = info.online_since {
        tlv::put_tlv_u32(&mut attrs, tlv_type::ONLINE_SINCE, at.timestamp() as u32);
    }
    if let Some(idle) = info.idle_minutes {
        tlv::put_tlv_u16(&mut attrs, tlv_type::IDLE_MINUTES, idle);
    }
    if info.caps != 0 {
        tlv::put_tlv_u32(&mut attrs, tlv_type::CAPABILITIES, info.caps);
    }
    if let Some(addr) = info.address {
        tlv::put_tlv_u32(&mut attrs, tlv_type::ADDRESS, addr);
    }
    if let Some(icon) = info.icon_info {
        let mut v = Vec::with_capacity(10);
        v.extend_from_slice(&icon.checksum.to_be_bytes());
        v.extend_from_slice(&icon.size.to_be_bytes());
        v.extend_from_slice(&icon.stamp.to_be_bytes());
        tlv::put_tlv(&mut attrs, tlv_type::ICON_INFO, &v);
    }

    let attr_count = [
        info.online_since.is_some(),
        info.idle_minutes.is_some(),
        info.caps != 0,
        info.address.is_some(),
        info.icon_info.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count() as u16;

    let name = info.screen_name.as_bytes();
    let mut buf = Vec::with_capacity(1 + name.len() + 4 + attrs.len());
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.extend_from_slice(&info.warning_level.to_be_bytes());
    buf.extend_from_slice(&attr_count.to_be_bytes());
    buf.extend_from_slice(&attrs);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_case_and_spaces() {
        assert_eq!(normalize_name("Screen Name"), "screenname");
        assert_eq!(normalize_name("ALICE"), "alice");
        assert_eq!(normalize_name("b o b"), "bob");
    }

    #[test]
    fn test_user_info_round_trip() {
        let info = UserInfo {
            screen_name: "alice".to_string(),
            warning_level: 30,
            online_since: Utc.timestamp_opt(1_000_000_000, 0).single(),
            idle_minutes: Some(12),
            caps: crate::constants::caps::WIDE_TEXT | crate::constants::caps::TYPING,
            address: Some(0x0A00_0001),
            icon_info: Some(IconInfo { checksum: 0xBEEF, size: 4096, stamp: 77 }),
        };
        let encoded = encode_user_info(&info);
        let mut reader = ByteReader::new(&encoded);
        let decoded = decode_user_info(&mut reader).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(reader.remaining(), 0);
        assert!(decoded.supports_wide_text());
        assert!(decoded.supports_typing());
    }

    #[test]
    fn test_minimal_user_info() {
        let encoded = encode_user_info(&UserInfo::named("bob"));
        let mut reader = ByteReader::new(&encoded);
        let decoded = decode_user_info(&mut reader).unwrap();
        assert_eq!(decoded.screen_name, "bob");
        assert_eq!(decoded.caps, 0);
        assert!(!decoded.supports_typing());
    }

    #[test]
    fn test_unknown_family_skipped() {
        let atom = Atom::new(0x7777, 0x0001, 0, vec![1, 2, 3]);
        assert_eq!(decode_server_atom(&atom).unwrap(), None);
    }
}
