//! Events delivered to the embedding application.
//!
//! The session sends every externally visible happening through a single
//! `mpsc::UnboundedSender<SessionEvent>`. Interactive prompts carry a
//! oneshot responder; dropping the responder counts as declining.

use tokio::sync::oneshot;

use crate::error::SignOnError;
use crate::list::ListEditError;
use crate::proto::icbm::TypingState;
use crate::proto::UserInfo;

/// Answer channel for an interactive prompt. Send `true` to approve.
pub type PromptResponder = oneshot::Sender<bool>;

/// Externally visible handle for a joined chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub(crate) u64);

/// Event from the session delivered to the embedding application.
#[derive(Debug)]
pub enum SessionEvent {
    /// Sign-on completed; the primary connection is up.
    SignedOn {
        /// Screen name as the server formats it.
        screen_name: String,
    },

    /// Sign-on failed with a server-reported reason. The session is over.
    SignOnFailed { error: SignOnError },

    /// The server offered only plaintext password authentication.
    ///
    /// Approving sends the password without digesting; declining ends the
    /// sign-on attempt.
    PlaintextAuthPrompt { respond: PromptResponder },

    /// The session ended. `error` is set when it ended on a failure rather
    /// than an orderly sign-off.
    Ended { error: Option<String> },

    /// A secondary service connection failed; the rest of the session
    /// continues without that feature.
    ServiceLost {
        service: &'static str,
        error: String,
    },

    /// A contact on the list came online or changed its advertised state.
    ContactOnline { info: UserInfo },

    /// A contact on the list went offline.
    ContactOffline { screen_name: String },

    /// An instant message arrived and was decoded.
    MessageReceived {
        sender: String,
        text: String,
        /// Set when the text had to be salvaged from undecodable bytes.
        note: Option<&'static str>,
    },

    /// The server acknowledged delivery of an outbound message.
    MessageDelivered { to: String },

    /// An outbound message failed.
    MessageFailed { to: String, reason: String },

    /// A contact's typing state changed.
    TypingChanged {
        screen_name: String,
        state: TypingState,
    },

    /// A contact appeared in the visible list or changed group/alias.
    ContactShown {
        name: String,
        group: String,
        alias: Option<String>,
    },

    /// A contact left the visible list.
    ContactHidden { name: String },

    /// Snapshot of the visible permit/deny lists after a change.
    PrivacyChanged {
        permits: Vec<String>,
        denies: Vec<String>,
    },

    /// The first full list download finished and reconciliation ran.
    ListSynchronized,

    /// A list edit was refused by the server and rolled back.
    ListEditFailed {
        subject: String,
        error: ListEditError,
    },

    /// A contact asked for authorization to add us. Approve or decline
    /// through the responder.
    AuthRequested {
        from: String,
        reason: Option<String>,
        respond: PromptResponder,
    },

    /// An authorization request went out to a contact that requires it.
    AuthorizationSent { to: String },

    /// A chat room was joined and bound to a room handle.
    RoomJoined { room: RoomId, name: String },

    /// The room connection is gone, either by request or by failure.
    RoomLeft { room: RoomId },

    /// Users entered or left a joined room.
    RoomRosterChanged {
        room: RoomId,
        joined: Vec<String>,
        left: Vec<String>,
    },

    /// A message arrived in a joined room.
    RoomMessage {
        room: RoomId,
        sender: String,
        text: String,
    },

    /// Reply to an email-address query.
    EmailInfo { email: String },

    /// Outcome of an administrative change (password, email, name format).
    AdminChangeDone {
        ok: bool,
        error_code: Option<u16>,
    },

    /// An away message could not be published; the away state is cleared.
    AwayFailed { reason: String },

    /// An icon upload was refused locally without touching the wire.
    IconRejected { reason: String },

    /// The server accepted our icon upload.
    OwnIconAccepted { checksum: u16 },

    /// A contact's icon arrived.
    IconUpdated {
        screen_name: String,
        data: bytes::Bytes,
    },

    /// Unread-mail notice from the alerts service.
    MailWaiting { unread: u16 },
}
