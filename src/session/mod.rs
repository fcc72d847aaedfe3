//! One signed-in account.
//!
//! A [`Session`] owns every connection, the list synchronizer, and all
//! per-contact state for one account. It runs as a single task draining
//! commands from the [`SessionHandle`], events from its connection tasks,
//! and its two timers through one `select!` loop, so no session state is
//! ever touched concurrently.

mod dispatch;
pub mod events;
pub mod handle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::codec::atom::Atom;
use crate::codec::frame::Frame;
use crate::config::SessionConfig;
use crate::conn::{Conn, ConnEvent, ConnId, ConnKind, ConnTarget, TcpTransport, Transport};
use crate::constants::{KEEPALIVE_INTERVAL, LIST_RETRY_DELAY, MAX_ICON_BYTES};
use crate::encoding::{encode_outgoing, WireEncoding};
use crate::list::{Synchronizer, VisibleList};
use crate::proto::service::RoomDescriptor;
use crate::proto::{self, normalize_name, IconInfo, RequestIds};

pub use events::{PromptResponder, RoomId, SessionEvent};
pub use handle::SessionHandle;

use handle::Command;

/// Where the sign-on sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthPhase {
    /// Authentication connection is dialing.
    Dialing,
    /// Key request sent, waiting for the digest challenge.
    KeyRequested,
    /// Server offered plaintext only; a consent prompt is outstanding.
    AwaitingConsent,
    /// Credentials sent, waiting for the sign-on reply.
    LoginSent,
    /// Sign-on accepted; the primary connection is dialing.
    Redirecting,
    /// Primary handshake complete.
    Online,
}

#[derive(Debug)]
struct ConnEntry {
    conn: Conn,
    /// Handshake acknowledged; atoms may be sent.
    ready: bool,
    /// Bound room, for chat connections only.
    room: Option<RoomId>,
}

/// Ephemeral per-contact knowledge, built up from presence and messaging
/// traffic. Cleared only at sign-off.
#[derive(Debug, Default)]
struct ContactState {
    typing_capable: bool,
    wide_capable: bool,
    address: Option<u32>,
    icon: Option<IconInfo>,
    icon_requested: bool,
}

#[derive(Debug)]
struct RoomState {
    descriptor: RoomDescriptor,
    /// Connection serving this room once its redirect resolved.
    conn: Option<ConnId>,
}

/// A signed-in account with its connections, list state, and timers.
///
/// Constructed through [`Session::open`], which spawns the session task and
/// returns the command handle plus the event stream.
pub struct Session {
    config: SessionConfig,
    screen_name: String,
    password: String,
    transport: Arc<dyn Transport>,

    event_tx: UnboundedSender<SessionEvent>,
    /// Weak so the loop still sees `cmd_rx` close when the application
    /// drops every handle; a strong sender here would keep the channel
    /// open and leak the whole session.
    cmd_tx: mpsc::WeakUnboundedSender<Command>,
    conn_tx: UnboundedSender<(ConnId, ConnEvent)>,
    timer_tx: UnboundedSender<()>,

    conns: HashMap<ConnId, ConnEntry>,
    next_conn_id: u64,
    ids: RequestIds,
    phase: AuthPhase,

    sync: Synchronizer,
    view: VisibleList,
    contacts: HashMap<String, ContactState>,
    capability_hint: Option<String>,
    show_idle: bool,
    away: Option<String>,

    /// Outbound messages awaiting their delivery acknowledgement, by
    /// request id.
    pending_messages: HashMap<u16, String>,
    /// Administrative operations requested before the admin connection
    /// existed.
    queued_admin: Vec<proto::admin::AdminRequest>,
    /// Rooms requested before the navigation connection existed.
    queued_rooms: Vec<RoomId>,
    rooms: HashMap<RoomId, RoomState>,
    next_room_id: u64,
    max_rooms: Option<u16>,
    mail_cookies: Vec<Vec<u8>>,

    own_icon: Option<Bytes>,
    /// An icon-service request is in flight; avoids double-opening while
    /// the redirect is pending.
    icon_opening: bool,
    wanted_icons: Vec<String>,

    retry_task: Option<JoinHandle<()>>,
    ending: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("screen_name", &self.screen_name)
            .field("phase", &self.phase)
            .field("conns", &self.conns.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Signs on over plain TCP. Returns the command handle and the event
    /// stream; the session itself runs as a spawned task until sign-off or
    /// a fatal error.
    pub fn open(
        config: SessionConfig,
        screen_name: &str,
        password: &str,
    ) -> (SessionHandle, UnboundedReceiver<SessionEvent>) {
        Self::open_with_transport(config, screen_name, password, Arc::new(TcpTransport))
    }

    /// Signs on through a caller-supplied dialer. This is the seam for TLS
    /// or proxy transports and for tests that run an in-process server.
    pub fn open_with_transport(
        config: SessionConfig,
        screen_name: &str,
        password: &str,
        transport: Arc<dyn Transport>,
    ) -> (SessionHandle, UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(cmd_tx.clone());
        let cmd_tx = cmd_tx.downgrade();
        let screen_name = screen_name.to_owned();
        let password = password.to_owned();

        tokio::spawn(async move {
            let (conn_tx, conn_rx) = mpsc::unbounded_channel();
            let (timer_tx, timer_rx) = mpsc::unbounded_channel();
            let mut session = Session {
                show_idle: config.show_idle,
                config,
                screen_name,
                password,
                transport,
                event_tx,
                cmd_tx,
                conn_tx,
                timer_tx,
                conns: HashMap::new(),
                next_conn_id: 1,
                ids: RequestIds::new(),
                phase: AuthPhase::Dialing,
                sync: Synchronizer::new(),
                view: VisibleList::new(),
                contacts: HashMap::new(),
                capability_hint: None,
                away: None,
                pending_messages: HashMap::new(),
                queued_admin: Vec::new(),
                queued_rooms: Vec::new(),
                rooms: HashMap::new(),
                next_room_id: 1,
                max_rooms: None,
                mail_cookies: Vec::new(),
                own_icon: None,
                icon_opening: false,
                wanted_icons: Vec::new(),
                retry_task: None,
                ending: false,
            };
            // The caller is already showing its stored list; reconciliation
            // hides whatever the server no longer has.
            for c in &session.config.stored_contacts {
                session
                    .view
                    .upsert_contact(&c.name, &c.group, c.alias.as_deref());
            }
            session.run(cmd_rx, conn_rx, timer_rx).await;
        });

        (handle, event_rx)
    }

    async fn run(
        mut self,
        mut cmd_rx: UnboundedReceiver<Command>,
        mut conn_rx: UnboundedReceiver<(ConnId, ConnEvent)>,
        mut timer_rx: UnboundedReceiver<()>,
    ) {
        info!(
            "[session] signing on {:?} via {}:{}",
            self.screen_name, self.config.host, self.config.port
        );
        let target = ConnTarget {
            host: self.config.host.clone(),
            port: self.config.port,
            secure: self.config.require_encryption,
            cookie: None,
        };
        self.spawn_conn(ConnKind::Auth, target, None);

        // A zero interval panics; a disabled keepalive still ticks at the
        // default rate and is dropped in the handler.
        let every = match self.config.keepalive_secs {
            0 => KEEPALIVE_INTERVAL,
            secs => Duration::from_secs(secs),
        };
        let mut keepalive = interval_at(Instant::now() + every, every);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.ending {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    // Every handle is gone; nobody is left to sign off.
                    None => self.teardown(None),
                },
                Some((id, event)) = conn_rx.recv() => self.on_conn_event(id, event),
                Some(()) = timer_rx.recv() => self.on_list_retry(),
                _ = keepalive.tick() => self.on_keepalive(),
            }
        }
        info!("[session] {:?} ended", self.screen_name);
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::SendMessage { to, text } => self.cmd_send_message(to, text),
            Command::SendTyping { to, state } => self.cmd_send_typing(to, state),
            Command::AddContact { name, group, alias } => self.cmd_add_contact(name, group, alias),
            Command::RemoveContact { name } => self.cmd_remove_contact(name),
            Command::MoveContact { name, group } => self.cmd_move_contact(name, group),
            Command::AliasContact { name, alias } => self.cmd_alias_contact(name, alias),
            Command::RenameGroup { old, new } => self.cmd_rename_group(old, new),
            Command::AddPermit { name } => self.cmd_privacy(name, false, true),
            Command::RemovePermit { name } => self.cmd_privacy(name, false, false),
            Command::AddDeny { name } => self.cmd_privacy(name, true, true),
            Command::RemoveDeny { name } => self.cmd_privacy(name, true, false),
            Command::SetIdleVisibility { visible } => self.cmd_set_idle_visibility(visible),
            Command::SetAway { message } => self.cmd_set_away(message),
            Command::RequestAuthorization { name } => self.cmd_request_authorization(name),
            Command::AuthVerdict { name, grant } => {
                let id = self.ids.next_id();
                self.send_primary_atom(proto::ssi::encode_auth_reply(&name, grant, id));
            }
            Command::PlaintextConsent { proceed } => self.cmd_plaintext_consent(proceed),
            Command::JoinRoom { name, exchange } => self.cmd_join_room(name, exchange),
            Command::LeaveRoom { room } => self.cmd_leave_room(room),
            Command::SendRoomMessage { room, text } => self.cmd_room_message(room, text),
            Command::SetIcon { data } => self.cmd_set_icon(data),
            Command::RequestIcon { name } => self.cmd_request_icon(name),
            Command::Admin(request) => self.cmd_admin(request),
            Command::SignOff => self.teardown(None),
        }
    }

    // ── messaging ────────────────────────────────────────────────────

    fn cmd_send_message(&mut self, to: String, text: String) {
        let out = match encode_outgoing(&text) {
            Ok(out) => out,
            Err(e) => {
                self.emit(SessionEvent::MessageFailed {
                    to,
                    reason: e.to_string(),
                });
                return;
            }
        };
        if out.encoding == WireEncoding::Ucs2 {
            let wide_known = self
                .contacts
                .get(&normalize_name(&to))
                .is_some_and(|c| c.wide_capable);
            // An account-level hint on our own list entry stands in for a
            // per-contact advertisement.
            let hinted = self
                .capability_hint
                .as_deref()
                .is_some_and(|h| h.contains("wide"));
            if !wide_known && !hinted {
                debug!("[encoding] {to:?} has not advertised wide text; wide is the guaranteed fallback");
            }
        }
        let id = self.ids.next_id();
        if self.send_primary_atom(proto::icbm::encode_send(&to, &out, true, id)) {
            self.pending_messages.insert(id, to);
        } else {
            self.emit(SessionEvent::MessageFailed {
                to,
                reason: "not connected".to_owned(),
            });
        }
    }

    fn cmd_send_typing(&mut self, to: String, state: proto::icbm::TypingState) {
        let capable = self
            .contacts
            .get(&normalize_name(&to))
            .is_some_and(|c| c.typing_capable);
        if !capable {
            debug!("[messaging] {to:?} has not advertised typing notifications");
            return;
        }
        let id = self.ids.next_id();
        self.send_primary_atom(proto::icbm::encode_typing(&to, state, id));
    }

    fn cmd_set_away(&mut self, message: Option<String>) {
        // Encode before committing, so a rejected message never leaves a
        // locally set but unpublished away state behind.
        if let Some(text) = message.as_deref() {
            if let Err(e) = encode_outgoing(text) {
                self.emit(SessionEvent::AwayFailed {
                    reason: e.to_string(),
                });
                return;
            }
        }
        self.away = message;
        self.push_away();
    }

    /// Publishes the current away state. An empty value clears it rather
    /// than leaving the previous message standing.
    fn push_away(&mut self) {
        let out = match self.away.as_deref().map(encode_outgoing) {
            Some(Ok(out)) => Some(out),
            Some(Err(e)) => {
                warn!("[messaging] away text dropped: {e}");
                self.away = None;
                self.emit(SessionEvent::AwayFailed {
                    reason: e.to_string(),
                });
                return;
            }
            None => None,
        };
        let id = self.ids.next_id();
        self.send_primary_atom(proto::location::encode_set_away(out.as_ref(), id));
    }

    // ── contact list edits ───────────────────────────────────────────

    fn list_ready(&self, what: &str) -> bool {
        if self.sync.is_synchronized() && self.ready_conn(ConnKind::Primary).is_some() {
            true
        } else {
            warn!("[list] ignoring {what} before the list is synchronized");
            false
        }
    }

    fn cmd_add_contact(&mut self, name: String, group: String, alias: Option<String>) {
        if !self.list_ready("add contact") {
            return;
        }
        self.view.upsert_contact(&name, &group, alias.as_deref());
        self.emit(SessionEvent::ContactShown {
            name: name.clone(),
            group: group.clone(),
            alias: alias.clone(),
        });
        for atom in self
            .sync
            .add_contact(&mut self.ids, &name, &group, alias.as_deref())
        {
            self.send_primary_atom(atom);
        }
    }

    fn cmd_remove_contact(&mut self, name: String) {
        if !self.list_ready("remove contact") {
            return;
        }
        if self.view.remove_contact(&name).is_some() {
            self.emit(SessionEvent::ContactHidden { name: name.clone() });
        }
        match self.sync.remove_contact(&mut self.ids, &name) {
            Some(atom) => {
                self.send_primary_atom(atom);
            }
            None => debug!("[list] remove of unknown contact {name:?}"),
        }
    }

    fn cmd_move_contact(&mut self, name: String, group: String) {
        if !self.list_ready("move contact") {
            return;
        }
        let alias = self.view.contact(&name).and_then(|c| c.alias.clone());
        self.view.upsert_contact(&name, &group, alias.as_deref());
        self.emit(SessionEvent::ContactShown {
            name: name.clone(),
            group: group.clone(),
            alias,
        });
        for atom in self.sync.move_contact(&mut self.ids, &name, &group) {
            self.send_primary_atom(atom);
        }
    }

    fn cmd_alias_contact(&mut self, name: String, alias: Option<String>) {
        if !self.list_ready("alias change") {
            return;
        }
        let Some(current) = self.view.contact(&name).cloned() else {
            warn!("[list] alias change for unknown contact {name:?}");
            return;
        };
        self.view
            .upsert_contact(&name, &current.group, alias.as_deref());
        self.emit(SessionEvent::ContactShown {
            name: name.clone(),
            group: current.group,
            alias: alias.clone(),
        });
        if let Some(atom) = self.sync.set_alias(&mut self.ids, &name, alias.as_deref()) {
            self.send_primary_atom(atom);
        }
    }

    fn cmd_rename_group(&mut self, old: String, new: String) {
        if !self.list_ready("group rename") {
            return;
        }
        let affected: Vec<_> = self
            .view
            .contacts()
            .filter(|c| c.group == old)
            .cloned()
            .collect();
        for contact in &affected {
            self.view
                .upsert_contact(&contact.name, &new, contact.alias.as_deref());
            self.emit(SessionEvent::ContactShown {
                name: contact.name.clone(),
                group: new.clone(),
                alias: contact.alias.clone(),
            });
        }
        match self.sync.rename_group(&mut self.ids, &old, &new) {
            Some(atom) => {
                self.send_primary_atom(atom);
            }
            None => warn!("[list] rename of unknown group {old:?}"),
        }
    }

    fn cmd_privacy(&mut self, name: String, deny: bool, add: bool) {
        if !self.list_ready("privacy edit") {
            return;
        }
        match (deny, add) {
            (false, true) => self.view.add_permit(&name),
            (false, false) => self.view.remove_permit(&name),
            (true, true) => self.view.add_deny(&name),
            (true, false) => self.view.remove_deny(&name),
        }
        self.emit_privacy();
        let atom = if add {
            Some(self.sync.add_privacy(&mut self.ids, &name, deny))
        } else {
            self.sync.remove_privacy(&mut self.ids, &name, deny)
        };
        if let Some(atom) = atom {
            self.send_primary_atom(atom);
        }
    }

    fn cmd_set_idle_visibility(&mut self, visible: bool) {
        self.show_idle = visible;
        if self.sync.is_synchronized() {
            if let Some(atom) = self.sync.set_idle_visibility(&mut self.ids, visible) {
                self.send_primary_atom(atom);
            }
        }
    }

    fn cmd_request_authorization(&mut self, name: String) {
        let id = self.ids.next_id();
        if self.send_primary_atom(proto::ssi::encode_auth_request(&name, "", id)) {
            self.emit(SessionEvent::AuthorizationSent { to: name });
        }
    }

    // ── authentication ───────────────────────────────────────────────

    fn cmd_plaintext_consent(&mut self, proceed: bool) {
        if self.phase != AuthPhase::AwaitingConsent {
            return;
        }
        if !proceed {
            warn!("[auth] plaintext authentication declined");
            self.teardown(Some("plaintext authentication declined".to_owned()));
            return;
        }
        let Some(conn) = self.ready_conn(ConnKind::Auth) else {
            return;
        };
        info!("[auth] proceeding with plaintext authentication");
        let id = self.ids.next_id();
        let atom = proto::auth::encode_login_plaintext(
            &self.screen_name,
            &self.password,
            &self.config.client_id,
            id,
        );
        self.send_frame(conn, Frame::Data(atom));
        self.phase = AuthPhase::LoginSent;
    }

    // ── chat rooms ───────────────────────────────────────────────────

    fn cmd_join_room(&mut self, name: String, exchange: u16) {
        if let Some(max) = self.max_rooms {
            if self.rooms.len() >= usize::from(max) {
                warn!("[chat] room limit {max} reached; not joining {name:?}");
                return;
            }
        }
        let room = RoomId(self.next_room_id);
        self.next_room_id += 1;
        self.rooms.insert(
            room,
            RoomState {
                descriptor: RoomDescriptor {
                    exchange,
                    name,
                    instance: 0,
                },
                conn: None,
            },
        );
        match self.ready_conn(ConnKind::ChatNav) {
            Some(chatnav) => self.request_room(chatnav, room),
            None => {
                self.queued_rooms.push(room);
                self.ensure_service(ConnKind::ChatNav);
            }
        }
    }

    fn request_room(&mut self, chatnav: ConnId, room: RoomId) {
        let Some(state) = self.rooms.get(&room) else {
            return;
        };
        let id = self.ids.next_id();
        let atom =
            proto::chat_nav::encode_create_room(state.descriptor.exchange, &state.descriptor.name, id);
        self.send_frame(chatnav, Frame::Data(atom));
    }

    fn cmd_leave_room(&mut self, room: RoomId) {
        self.queued_rooms.retain(|r| *r != room);
        let Some(state) = self.rooms.remove(&room) else {
            return;
        };
        if let Some(conn_id) = state.conn {
            if let Some(entry) = self.conns.remove(&conn_id) {
                entry.conn.send(Frame::Close);
                entry.conn.disconnect();
            }
        }
        self.emit(SessionEvent::RoomLeft { room });
    }

    fn cmd_room_message(&mut self, room: RoomId, text: String) {
        let Some(conn_id) = self.rooms.get(&room).and_then(|r| r.conn) else {
            warn!("[chat] no connection for room {room:?}");
            return;
        };
        match encode_outgoing(&text) {
            Ok(out) => {
                let id = self.ids.next_id();
                self.send_frame(conn_id, Frame::Data(proto::chat::encode_message(&out, id)));
            }
            Err(e) => warn!("[chat] room message dropped: {e}"),
        }
    }

    // ── icons and admin ──────────────────────────────────────────────

    fn cmd_set_icon(&mut self, data: Vec<u8>) {
        if data.len() > MAX_ICON_BYTES {
            self.emit(SessionEvent::IconRejected {
                reason: format!("icon is {} bytes, limit is {MAX_ICON_BYTES}", data.len()),
            });
            return;
        }
        let data = Bytes::from(data);
        self.own_icon = Some(data.clone());
        match self.ready_conn(ConnKind::Icon) {
            Some(icon) => {
                let id = self.ids.next_id();
                self.send_frame(icon, Frame::Data(proto::icon::encode_upload(&data, id)));
            }
            None => self.ensure_service(ConnKind::Icon),
        }
    }

    fn cmd_request_icon(&mut self, name: String) {
        self.wanted_icons.push(name);
        match self.ready_conn(ConnKind::Icon) {
            Some(_) => self.flush_icon_requests(),
            None => self.ensure_service(ConnKind::Icon),
        }
    }

    fn flush_icon_requests(&mut self) {
        let Some(icon) = self.ready_conn(ConnKind::Icon) else {
            return;
        };
        for name in std::mem::take(&mut self.wanted_icons) {
            let key = normalize_name(&name);
            let checksum = self
                .contacts
                .get(&key)
                .and_then(|c| c.icon.as_ref())
                .map(|i| i.checksum)
                .unwrap_or(0);
            let id = self.ids.next_id();
            self.send_frame(icon, Frame::Data(proto::icon::encode_request(&name, checksum, id)));
            if let Some(state) = self.contacts.get_mut(&key) {
                state.icon_requested = true;
            }
        }
    }

    fn cmd_admin(&mut self, request: proto::admin::AdminRequest) {
        match self.ready_conn(ConnKind::Admin) {
            Some(conn) => {
                let id = self.ids.next_id();
                self.send_frame(conn, Frame::Data(proto::admin::encode_request(&request, id)));
            }
            None => {
                self.queued_admin.push(request);
                self.ensure_service(ConnKind::Admin);
            }
        }
    }

    // ── connections ──────────────────────────────────────────────────

    fn spawn_conn(&mut self, kind: ConnKind, target: ConnTarget, room: Option<RoomId>) -> ConnId {
        let id = ConnId(self.next_conn_id);
        self.next_conn_id += 1;
        debug!("[conn] opening {kind} connection to {}:{}", target.host, target.port);
        let conn = Conn::spawn(id, kind, Arc::clone(&self.transport), target, self.conn_tx.clone());
        self.conns.insert(id, ConnEntry { conn, ready: false, room });
        id
    }

    /// Asks the primary connection for a redirect to a secondary service,
    /// unless a connection of that kind already exists or is being opened.
    fn ensure_service(&mut self, kind: ConnKind) {
        if self.conns.values().any(|e| e.conn.kind() == kind) {
            return;
        }
        if kind == ConnKind::Icon && self.icon_opening {
            return;
        }
        let Some(service) = kind.service_id() else {
            return;
        };
        let Some(primary) = self.ready_conn(ConnKind::Primary) else {
            warn!("[conn] cannot request {kind} service before sign-on completes");
            return;
        };
        let id = self.ids.next_id();
        let sent = self.send_frame(
            primary,
            Frame::Data(proto::service::encode_service_request(service, None, id)),
        );
        if sent && kind == ConnKind::Icon {
            self.icon_opening = true;
        }
    }

    fn ready_conn(&self, kind: ConnKind) -> Option<ConnId> {
        self.conns
            .iter()
            .find(|(_, e)| e.ready && e.conn.kind() == kind)
            .map(|(id, _)| *id)
    }

    fn send_frame(&self, id: ConnId, frame: Frame) -> bool {
        self.conns
            .get(&id)
            .map(|e| e.conn.send(frame))
            .unwrap_or(false)
    }

    fn send_primary_atom(&self, atom: Atom) -> bool {
        match self.ready_conn(ConnKind::Primary) {
            Some(id) => self.send_frame(id, Frame::Data(atom)),
            None => false,
        }
    }

    // ── timers ───────────────────────────────────────────────────────

    fn arm_list_retry(&mut self) {
        self.cancel_list_retry();
        let tx = self.timer_tx.clone();
        self.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(LIST_RETRY_DELAY).await;
            let _ = tx.send(());
        }));
    }

    fn cancel_list_retry(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    fn on_list_retry(&mut self) {
        self.retry_task = None;
        if self.sync.is_synchronized() {
            return;
        }
        debug!("[list] retry timer fired");
        let atoms = self.sync.retry_due(&mut self.ids);
        if atoms.is_empty() {
            return;
        }
        for atom in atoms {
            self.send_primary_atom(atom);
        }
        self.arm_list_retry();
    }

    /// Probes liveness on the primary connection.
    fn on_keepalive(&mut self) {
        if self.config.keepalive_secs == 0 {
            return;
        }
        if let Some(primary) = self.ready_conn(ConnKind::Primary) {
            self.send_frame(primary, Frame::Keepalive);
        }
    }

    // ── plumbing ─────────────────────────────────────────────────────

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_privacy(&self) {
        self.emit(SessionEvent::PrivacyChanged {
            permits: self.view.permits().map(str::to_owned).collect(),
            denies: self.view.denies().map(str::to_owned).collect(),
        });
    }

    /// Emits a prompt event and spawns the task that feeds the answer back
    /// into the command loop. A dropped responder answers `false`.
    fn prompt(
        &self,
        build: impl FnOnce(PromptResponder) -> SessionEvent,
        answer: impl FnOnce(bool) -> Command + Send + 'static,
    ) {
        let (tx, rx) = oneshot::channel();
        self.emit(build(tx));
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let verdict = rx.await.unwrap_or(false);
            // The upgrade fails only after every handle is gone, and then
            // there is no session left to answer to.
            if let Some(cmd_tx) = cmd_tx.upgrade() {
                let _ = cmd_tx.send(answer(verdict));
            }
        });
    }

    fn contact_state(&mut self, name: &str) -> &mut ContactState {
        self.contacts.entry(normalize_name(name)).or_default()
    }

    fn teardown(&mut self, error: Option<String>) {
        if self.ending {
            return;
        }
        self.ending = true;
        self.cancel_list_retry();
        for (_, entry) in self.conns.drain() {
            entry.conn.send(Frame::Close);
            entry.conn.disconnect();
        }
        self.rooms.clear();
        self.contacts.clear();
        self.emit(SessionEvent::Ended { error });
    }
}
