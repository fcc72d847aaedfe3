//! Protocol-wide constants for flapjack.
//!
//! This module centralizes the wire-level numbers (family ids, subtypes,
//! TLV types, acknowledgement codes) and the session timing constants so
//! the rest of the crate never spells a magic number inline. Constants are
//! grouped by domain.
//!
//! # Categories
//!
//! - **Families**: atom family ids and the subtypes handled per family
//! - **TLVs**: attribute type numbers shared across families
//! - **Contact list**: item types, attribute TLVs, acknowledgement codes
//! - **Timing**: keepalive, list-retry, and connect timeouts

use std::time::Duration;

/// Wire protocol version sent in the handshake hello frame.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default server port when a redirect host string omits one.
pub const DEFAULT_PORT: u16 = 5190;

/// Maximum encoded message payload in bytes; longer messages are retried
/// once with markup stripped, then rejected.
pub const MAX_MESSAGE_BYTES: usize = 2544;

/// Largest icon the upload service accepts. Anything bigger is refused
/// before a connection is opened for it; the upload atom carries the
/// image behind a u16 length, so this must stay well under that.
pub const MAX_ICON_BYTES: usize = 7168;

/// Name of the fallback group that adopts contacts whose parent group is
/// missing from the server list.
pub const ORPHAN_GROUP_NAME: &str = "Orphans";

// ============================================================================
// Families
// ============================================================================

/// Atom family ids. Service ids carried in redirect atoms reuse these
/// numbers, with [`family::SERVICE`] doubling as the primary-session id.
pub mod family {
    /// Generic service control: host-ready, redirects, rate parameters.
    pub const SERVICE: u16 = 0x0001;
    /// Own location info: away message publication.
    pub const LOCATION: u16 = 0x0002;
    /// Contact presence: arrived/departed notifications.
    pub const PRESENCE: u16 = 0x0003;
    /// Instant messages, typing notifications, delivery acks and errors.
    pub const MESSAGING: u16 = 0x0004;
    /// Account administration: password/email/screen-name changes.
    pub const ADMIN: u16 = 0x0007;
    /// Chat navigation: room creation brokering.
    pub const CHAT_NAV: u16 = 0x000D;
    /// A joined chat room.
    pub const CHAT: u16 = 0x000E;
    /// Buddy icon upload/fetch.
    pub const ICON: u16 = 0x0010;
    /// Server-side contact list (SSI).
    pub const SSI: u16 = 0x0013;
    /// Credential exchange.
    pub const AUTH: u16 = 0x0017;
    /// Mail alerts.
    pub const ALERTS: u16 = 0x0018;
}

/// Subtypes of [`family::SERVICE`].
pub mod service {
    /// Server → client: error report for this family.
    pub const ERROR: u16 = 0x0001;
    /// Server → client: handshake finished, families available.
    pub const HOST_READY: u16 = 0x0003;
    /// Client → server: request a redirect to a secondary service.
    pub const SERVICE_REQUEST: u16 = 0x0004;
    /// Server → client: redirect (service id, host, cookie, room meta).
    pub const REDIRECT: u16 = 0x0005;
    /// Server → client: rate limit parameters.
    pub const RATE_PARAMS: u16 = 0x0007;
    /// Client → server: acknowledge rate parameters.
    pub const RATE_ACK: u16 = 0x0008;
}

/// Subtypes of [`family::LOCATION`].
pub mod location {
    /// Client → server: publish or clear own info (away message).
    pub const SET_INFO: u16 = 0x0004;
}

/// Subtypes of [`family::PRESENCE`].
pub mod presence {
    /// Server → client: a contact signed on or changed state.
    pub const ARRIVED: u16 = 0x000B;
    /// Server → client: a contact signed off.
    pub const DEPARTED: u16 = 0x000C;
}

/// Subtypes of [`family::MESSAGING`].
pub mod messaging {
    /// Server → client: a previously sent message bounced.
    pub const ERROR: u16 = 0x0001;
    /// Client → server: outbound message.
    pub const SEND: u16 = 0x0006;
    /// Server → client: inbound message.
    pub const RECEIVE: u16 = 0x0007;
    /// Server → client: delivery acknowledgement for a sent message.
    pub const ACK: u16 = 0x000C;
    /// Both directions: typing notification.
    pub const TYPING: u16 = 0x0014;
}

/// Subtypes of [`family::ADMIN`].
pub mod admin {
    /// Server → client: error report for this family.
    pub const ERROR: u16 = 0x0001;
    /// Client → server: query account info (email).
    pub const INFO_QUERY: u16 = 0x0002;
    /// Server → client: account info reply.
    pub const INFO_REPLY: u16 = 0x0003;
    /// Client → server: change account info (password, email, formatted name).
    pub const CHANGE_REQUEST: u16 = 0x0004;
    /// Server → client: change acknowledgement.
    pub const CHANGE_REPLY: u16 = 0x0005;
}

/// Subtypes of [`family::CHAT_NAV`].
pub mod chat_nav {
    /// Server → client: error report for this family.
    pub const ERROR: u16 = 0x0001;
    /// Client → server: request navigation rights/limits.
    pub const RIGHTS_REQUEST: u16 = 0x0002;
    /// Client → server: create (or resolve) a room on an exchange.
    pub const CREATE_ROOM: u16 = 0x0008;
    /// Server → client: rights reply or fully-qualified room info.
    pub const INFO_REPLY: u16 = 0x0009;
}

/// Subtypes of [`family::CHAT`].
pub mod chat {
    /// Server → client: error report for this family.
    pub const ERROR: u16 = 0x0001;
    /// Client → server: join the room named in the connection handoff.
    pub const JOIN: u16 = 0x0002;
    /// Server → client: users present/arrived.
    pub const USERS_JOINED: u16 = 0x0003;
    /// Server → client: users left.
    pub const USERS_LEFT: u16 = 0x0004;
    /// Both directions: a room message.
    pub const MESSAGE: u16 = 0x0006;
}

/// Subtypes of [`family::ICON`].
pub mod icon {
    /// Server → client: error report for this family.
    pub const ERROR: u16 = 0x0001;
    /// Client → server: upload own icon.
    pub const UPLOAD: u16 = 0x0002;
    /// Server → client: upload acknowledgement (hash).
    pub const UPLOAD_ACK: u16 = 0x0003;
    /// Client → server: fetch a contact's icon by hash.
    pub const REQUEST: u16 = 0x0004;
    /// Server → client: icon data reply.
    pub const REPLY: u16 = 0x0005;
}

/// Subtypes of [`family::SSI`].
pub mod ssi {
    /// Server → client: error for this family (rate limit uses this).
    pub const ERROR: u16 = 0x0001;
    /// Client → server: request list rights/limits.
    pub const RIGHTS_REQUEST: u16 = 0x0002;
    /// Server → client: rights reply.
    pub const RIGHTS_REPLY: u16 = 0x0003;
    /// Client → server: request the full list.
    pub const DATA_REQUEST: u16 = 0x0004;
    /// Server → client: list contents.
    pub const LIST: u16 = 0x0006;
    /// Client → server: activate the list so presence flows.
    pub const ACTIVATE: u16 = 0x0007;
    /// Client → server: insert items.
    pub const ADD: u16 = 0x0008;
    /// Client → server: update items in place.
    pub const MODIFY: u16 = 0x0009;
    /// Client → server: delete items.
    pub const DELETE: u16 = 0x000A;
    /// Server → client: per-item acknowledgement codes.
    pub const ACK: u16 = 0x000E;
    /// Client → server: ask a contact for authorization.
    pub const AUTH_REQUEST: u16 = 0x0018;
    /// Server → client: a contact asks us for authorization.
    pub const AUTH_REQUESTED: u16 = 0x0019;
    /// Client → server: grant or deny an authorization request.
    pub const AUTH_REPLY: u16 = 0x001A;
}

/// Subtypes of [`family::AUTH`].
pub mod auth {
    /// Client → server: sign-on request with digested credentials.
    pub const LOGIN_REQUEST: u16 = 0x0002;
    /// Server → client: sign-on reply (redirect TLVs or error code).
    pub const LOGIN_REPLY: u16 = 0x0003;
    /// Client → server: request the digest challenge key.
    pub const KEY_REQUEST: u16 = 0x0006;
    /// Server → client: digest challenge key.
    pub const KEY_REPLY: u16 = 0x0007;
}

/// Subtypes of [`family::ALERTS`].
pub mod alerts {
    /// Client → server: present stored mail cookies.
    pub const MAIL_COOKIES: u16 = 0x0006;
    /// Server → client: mailbox status update.
    pub const MAIL_STATUS: u16 = 0x0007;
    /// Client → server: activate alert delivery.
    pub const ACTIVATE: u16 = 0x0016;
}

// ============================================================================
// TLV types
// ============================================================================

/// TLV type numbers. Scoped per containing atom; listed together because
/// several (host/cookie) recur across families.
pub mod tlv {
    /// Screen name (auth).
    pub const SCREEN_NAME: u16 = 0x0001;
    /// Digested password (auth).
    pub const PASSWORD_DIGEST: u16 = 0x0025;
    /// Plaintext password (auth fallback, prompt-gated).
    pub const PASSWORD_PLAIN: u16 = 0x0002;
    /// Client identification string (auth).
    pub const CLIENT_ID: u16 = 0x0003;
    /// Redirect target host `host[:port]`.
    pub const HOST: u16 = 0x0005;
    /// Opaque handoff cookie.
    pub const COOKIE: u16 = 0x0006;
    /// Sign-on error code (auth reply).
    pub const ERROR_CODE: u16 = 0x0008;
    /// Redirect service id.
    pub const SERVICE_ID: u16 = 0x000D;
    /// Redirect requests an encrypted transport (u8 boolean).
    pub const ENCRYPT: u16 = 0x008D;
    /// Chat redirect: room name.
    pub const ROOM_NAME: u16 = 0x006A;
    /// Chat redirect: exchange id (u16).
    pub const ROOM_EXCHANGE: u16 = 0x006B;
    /// Chat redirect: instance id (u16).
    pub const ROOM_INSTANCE: u16 = 0x006C;
    /// User info: online-since (u32 epoch seconds).
    pub const ONLINE_SINCE: u16 = 0x0003;
    /// User info: idle minutes (u16).
    pub const IDLE_MINUTES: u16 = 0x0004;
    /// Contact-list rights reply: maximum list items (u16).
    pub const MAX_LIST_ITEMS: u16 = 0x0004;
    /// Chat navigation rights reply: maximum joined rooms (u16).
    pub const MAX_ROOMS: u16 = 0x0002;
    /// User info: capability flags (u32).
    pub const CAPABILITIES: u16 = 0x000D;
    /// User info: numeric address (u32).
    pub const ADDRESS: u16 = 0x000A;
    /// User info: icon metadata (u16 length-checksum + u32 size + u32 stamp).
    pub const ICON_INFO: u16 = 0x001D;
    /// Message atom: encoded text block.
    pub const MESSAGE_TEXT: u16 = 0x0002;
    /// Location set-info: away message text block (empty clears it).
    pub const AWAY_TEXT: u16 = 0x0004;
    /// Message atom: sender requests a delivery ack.
    pub const REQUEST_ACK: u16 = 0x0009;
    /// Admin: new password.
    pub const NEW_PASSWORD: u16 = 0x0012;
    /// Admin: current password.
    pub const OLD_PASSWORD: u16 = 0x0013;
    /// Admin: email address.
    pub const EMAIL: u16 = 0x0011;
    /// Admin: formatted screen name.
    pub const FORMATTED_NAME: u16 = 0x0014;
}

/// Capability bit flags advertised in user info.
pub mod caps {
    /// Peer understands 16-bit-unit ("wide") message text.
    pub const WIDE_TEXT: u32 = 0x0000_0001;
    /// Peer understands typing notifications.
    pub const TYPING: u32 = 0x0000_0002;
    /// Peer can serve buddy icons.
    pub const ICONS: u32 = 0x0000_0004;
    /// Peer understands chat invitations.
    pub const CHAT: u32 = 0x0000_0008;
}

// ============================================================================
// Contact list
// ============================================================================

/// SSI item type codes.
pub mod item_type {
    /// A contact inside a group.
    pub const CONTACT: u16 = 0x0000;
    /// A group of contacts.
    pub const GROUP: u16 = 0x0001;
    /// A permit-list entry.
    pub const PERMIT: u16 = 0x0002;
    /// A deny-list entry.
    pub const DENY: u16 = 0x0003;
    /// The single presence-settings item.
    pub const PRESENCE: u16 = 0x0004;
}

/// TLV attributes carried inside SSI items.
pub mod item_attr {
    /// Contact display alias (UTF-8).
    pub const ALIAS: u16 = 0x0131;
    /// Contact free-text comment (UTF-8).
    pub const COMMENT: u16 = 0x013C;
    /// Contact is awaiting authorization (zero-length flag).
    pub const AWAITING_AUTH: u16 = 0x0066;
    /// Presence item: bit flags (u32).
    pub const PRESENCE_FLAGS: u16 = 0x00C9;
}

/// Bit flags of the presence-settings item.
pub mod presence_flags {
    /// Other users may see this account's idle time.
    pub const SHOW_IDLE: u32 = 0x0000_0400;
}

/// SSI acknowledgement codes (one u16 per item in an ack atom).
pub mod ssi_ack {
    /// Operation applied.
    pub const SUCCESS: u16 = 0x0000;
    /// Server list is full; operation rejected.
    pub const LIST_FULL: u16 = 0x000C;
    /// Target contact requires authorization before being listed.
    pub const AUTH_REQUIRED: u16 = 0x000E;
}

/// Family error code signalled when a rights/data request was rate limited.
pub const RATE_LIMIT_CODE: u16 = 0x0005;

// ============================================================================
// Timing
// ============================================================================

/// Keepalive interval on the primary connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed delay before re-requesting contact-list rights/data after a
/// rate-limit error or a silent server.
pub const LIST_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Socket connect timeout applied by the default transport.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_values_are_reasonable() {
        assert!(KEEPALIVE_INTERVAL >= Duration::from_secs(10));
        assert!(LIST_RETRY_DELAY >= Duration::from_secs(5));
        assert!(CONNECT_TIMEOUT >= Duration::from_secs(5));
    }

    #[test]
    fn test_item_types_are_distinct() {
        let all = [
            item_type::CONTACT,
            item_type::GROUP,
            item_type::PERMIT,
            item_type::DENY,
            item_type::PRESENCE,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_message_limit_fits_sixteen_bit_length() {
        assert!(MAX_MESSAGE_BYTES < usize::from(u16::MAX));
    }

    #[test]
    fn test_icon_limit_fits_its_upload_atom() {
        // Checksum, length prefix, and atom header all ride in the same
        // u16-length frame payload.
        assert!(MAX_ICON_BYTES + 12 < usize::from(u16::MAX));
    }
}
