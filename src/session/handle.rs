//! Application-side handle for a running session.

use tokio::sync::mpsc::UnboundedSender;

use crate::proto::admin::AdminRequest;
use crate::proto::icbm::TypingState;
use crate::session::events::RoomId;

/// Command from the embedding application to the session loop.
#[derive(Debug)]
pub(crate) enum Command {
    SendMessage { to: String, text: String },
    SendTyping { to: String, state: TypingState },
    AddContact {
        name: String,
        group: String,
        alias: Option<String>,
    },
    RemoveContact { name: String },
    MoveContact { name: String, group: String },
    AliasContact {
        name: String,
        alias: Option<String>,
    },
    RenameGroup { old: String, new: String },
    AddPermit { name: String },
    RemovePermit { name: String },
    AddDeny { name: String },
    RemoveDeny { name: String },
    SetIdleVisibility { visible: bool },
    SetAway { message: Option<String> },
    RequestAuthorization { name: String },
    AuthVerdict { name: String, grant: bool },
    PlaintextConsent { proceed: bool },
    JoinRoom { name: String, exchange: u16 },
    LeaveRoom { room: RoomId },
    SendRoomMessage { room: RoomId, text: String },
    SetIcon { data: Vec<u8> },
    RequestIcon { name: String },
    Admin(AdminRequest),
    SignOff,
}

/// Cheaply cloneable handle that feeds commands into the session loop.
///
/// Every method is fire-and-forget: results and failures come back as
/// [`SessionEvent`](crate::session::SessionEvent)s. Commands sent after the
/// session ended are dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: UnboundedSender<Command>,
}

impl SessionHandle {
    pub(crate) fn new(cmd_tx: UnboundedSender<Command>) -> Self {
        Self { cmd_tx }
    }

    fn send(&self, cmd: Command) {
        let _ = self.cmd_tx.send(cmd);
    }

    /// Sends an instant message. Encoding negotiation happens inside the
    /// session; oversize messages surface as a `MessageFailed` event.
    pub fn send_message(&self, to: &str, text: &str) {
        self.send(Command::SendMessage {
            to: to.to_owned(),
            text: text.to_owned(),
        });
    }

    /// Sends a typing notification. Dropped silently when the contact has
    /// not advertised typing support.
    pub fn send_typing(&self, to: &str, state: TypingState) {
        self.send(Command::SendTyping {
            to: to.to_owned(),
            state,
        });
    }

    pub fn add_contact(&self, name: &str, group: &str, alias: Option<&str>) {
        self.send(Command::AddContact {
            name: name.to_owned(),
            group: group.to_owned(),
            alias: alias.map(str::to_owned),
        });
    }

    pub fn remove_contact(&self, name: &str) {
        self.send(Command::RemoveContact {
            name: name.to_owned(),
        });
    }

    pub fn move_contact(&self, name: &str, group: &str) {
        self.send(Command::MoveContact {
            name: name.to_owned(),
            group: group.to_owned(),
        });
    }

    pub fn alias_contact(&self, name: &str, alias: Option<&str>) {
        self.send(Command::AliasContact {
            name: name.to_owned(),
            alias: alias.map(str::to_owned),
        });
    }

    pub fn rename_group(&self, old: &str, new: &str) {
        self.send(Command::RenameGroup {
            old: old.to_owned(),
            new: new.to_owned(),
        });
    }

    pub fn add_permit(&self, name: &str) {
        self.send(Command::AddPermit {
            name: name.to_owned(),
        });
    }

    pub fn remove_permit(&self, name: &str) {
        self.send(Command::RemovePermit {
            name: name.to_owned(),
        });
    }

    pub fn add_deny(&self, name: &str) {
        self.send(Command::AddDeny {
            name: name.to_owned(),
        });
    }

    pub fn remove_deny(&self, name: &str) {
        self.send(Command::RemoveDeny {
            name: name.to_owned(),
        });
    }

    /// Controls whether other users may see this account's idle time.
    pub fn set_idle_visibility(&self, visible: bool) {
        self.send(Command::SetIdleVisibility { visible });
    }

    /// Publishes an away message, or clears it with `None`. A message set
    /// before sign-on completes is published once the session is online.
    pub fn set_away(&self, message: Option<&str>) {
        self.send(Command::SetAway {
            message: message.map(str::to_owned),
        });
    }

    /// Re-sends an authorization request to a contact that requires one.
    pub fn request_authorization(&self, name: &str) {
        self.send(Command::RequestAuthorization {
            name: name.to_owned(),
        });
    }

    pub fn join_room(&self, name: &str, exchange: u16) {
        self.send(Command::JoinRoom {
            name: name.to_owned(),
            exchange,
        });
    }

    pub fn leave_room(&self, room: RoomId) {
        self.send(Command::LeaveRoom { room });
    }

    pub fn send_room_message(&self, room: RoomId, text: &str) {
        self.send(Command::SendRoomMessage {
            room,
            text: text.to_owned(),
        });
    }

    /// Uploads a new buddy icon, opening the icon connection on demand.
    pub fn set_icon(&self, data: Vec<u8>) {
        self.send(Command::SetIcon { data });
    }

    pub fn request_icon(&self, name: &str) {
        self.send(Command::RequestIcon {
            name: name.to_owned(),
        });
    }

    /// Queues an administrative operation, opening the admin connection on
    /// demand.
    pub fn admin(&self, request: AdminRequest) {
        self.send(Command::Admin(request));
    }

    /// Ends the session with an orderly close on every connection.
    pub fn sign_off(&self) {
        self.send(Command::SignOff);
    }
}
