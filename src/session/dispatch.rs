//! Inbound side of the session: connection events, handshake completion,
//! and the atom dispatch that drives all session state.

use bytes::Bytes;
use log::{debug, info, warn};

use super::handle::Command;
use super::{AuthPhase, Session, SessionEvent};
use crate::codec::frame::{Frame, InboundFrame};
use crate::conn::{parse_host_port, ConnEvent, ConnId, ConnKind, ConnTarget};
use crate::constants::{family, item_type, LIST_RETRY_DELAY, PROTOCOL_VERSION};
use crate::encoding::decode_incoming;
use crate::list::{reconcile, AckDisposition};
use crate::proto::service::Redirect;
use crate::proto::{self, normalize_name, ServerAtom, SignOnOutcome, UserInfo};

fn close_reason(kind: ConnKind, error: &Option<anyhow::Error>) -> String {
    match error {
        Some(e) => format!("{kind} connection lost: {e:#}"),
        None => format!("{kind} connection closed by server"),
    }
}

impl Session {
    pub(super) fn on_conn_event(&mut self, id: ConnId, event: ConnEvent) {
        match event {
            ConnEvent::Established => {
                if let Some(entry) = self.conns.get(&id) {
                    debug!("[conn] {} transport established", entry.conn.kind());
                }
            }
            ConnEvent::Frame(inbound) => self.on_frame(id, inbound),
            ConnEvent::Closed { error } => self.on_conn_closed(id, error),
        }
    }

    fn on_frame(&mut self, id: ConnId, inbound: InboundFrame) {
        // A frame can race in behind a close we already processed.
        let Some(entry) = self.conns.get_mut(&id) else {
            return;
        };
        let kind = entry.conn.kind();
        match inbound.frame {
            Frame::Hello { version, .. } => {
                let first = !entry.ready;
                entry.ready = true;
                if version != PROTOCOL_VERSION {
                    warn!(
                        "[conn] {kind} peer speaks version {version}, continuing with {PROTOCOL_VERSION}"
                    );
                }
                if first {
                    self.finalize(id, kind);
                }
            }
            Frame::Data(atom) => match proto::decode_server_atom(&atom) {
                Ok(Some(server)) => self.on_atom(id, kind, server),
                Ok(None) => debug!(
                    "[conn] {kind} sent unhandled atom {:#06x}/{:#06x}",
                    atom.family, atom.subtype
                ),
                Err(e) => self.on_conn_closed(id, Some(e)),
            },
            Frame::Error { code } => {
                self.on_conn_closed(id, Some(anyhow::anyhow!("peer reported error {code:#06x}")));
            }
            Frame::Close => self.on_conn_closed(id, None),
            Frame::Keepalive => {}
        }
    }

    pub(super) fn on_conn_closed(&mut self, id: ConnId, error: Option<anyhow::Error>) {
        // Remove first so anything racing in behind the close is dropped.
        let Some(entry) = self.conns.remove(&id) else {
            return;
        };
        let kind = entry.conn.kind();
        entry.conn.send(Frame::Close);
        entry.conn.disconnect();
        match &error {
            Some(e) => warn!("[conn] {kind} connection lost: {e:#}"),
            None => debug!("[conn] {kind} connection closed"),
        }

        // Losing the credential connection before sign-on completes is
        // fatal; after the handoff it is removed from the table, so its
        // close never reaches this point. Losing the primary is always
        // fatal.
        if kind.is_fatal() {
            self.teardown(Some(close_reason(kind, &error)));
            return;
        }
        match kind {
            ConnKind::Chat => {
                if let Some(room) = entry.room {
                    if self.rooms.remove(&room).is_some() {
                        self.emit(SessionEvent::RoomLeft { room });
                    }
                }
            }
            ConnKind::Icon => {
                self.icon_opening = false;
                if let Some(e) = &error {
                    self.emit(SessionEvent::ServiceLost {
                        service: kind.label(),
                        error: format!("{e:#}"),
                    });
                }
            }
            _ => {
                if let Some(e) = &error {
                    self.emit(SessionEvent::ServiceLost {
                        service: kind.label(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }
    }

    /// Runs once per connection when the server's hello lands.
    fn finalize(&mut self, id: ConnId, kind: ConnKind) {
        info!("[conn] {kind} handshake complete");
        match kind {
            ConnKind::Auth => {
                self.phase = AuthPhase::KeyRequested;
                let rid = self.ids.next_id();
                self.send_frame(
                    id,
                    Frame::Data(proto::auth::encode_key_request(&self.screen_name, rid)),
                );
            }
            ConnKind::Primary => self.finalize_primary(),
            ConnKind::Admin => {
                for request in std::mem::take(&mut self.queued_admin) {
                    let rid = self.ids.next_id();
                    self.send_frame(id, Frame::Data(proto::admin::encode_request(&request, rid)));
                }
            }
            ConnKind::ChatNav => {
                let rid = self.ids.next_id();
                self.send_frame(id, Frame::Data(proto::chat_nav::encode_rights_request(rid)));
                for room in std::mem::take(&mut self.queued_rooms) {
                    self.request_room(id, room);
                }
            }
            ConnKind::Alerts => {
                if !self.mail_cookies.is_empty() {
                    let rid = self.ids.next_id();
                    self.send_frame(
                        id,
                        Frame::Data(proto::alerts::encode_mail_cookies(&self.mail_cookies, rid)),
                    );
                }
                let rid = self.ids.next_id();
                self.send_frame(id, Frame::Data(proto::alerts::encode_activate(rid)));
            }
            ConnKind::Icon => {
                self.icon_opening = false;
                if let Some(data) = self.own_icon.clone() {
                    let rid = self.ids.next_id();
                    self.send_frame(id, Frame::Data(proto::icon::encode_upload(&data, rid)));
                }
                self.flush_icon_requests();
            }
            ConnKind::Chat => {
                let Some(room) = self.conns.get(&id).and_then(|e| e.room) else {
                    return;
                };
                let Some(state) = self.rooms.get_mut(&room) else {
                    return;
                };
                state.conn = Some(id);
                let descriptor = state.descriptor.clone();
                let rid = self.ids.next_id();
                self.send_frame(id, Frame::Data(proto::chat::encode_join(&descriptor, rid)));
                self.emit(SessionEvent::RoomJoined {
                    room,
                    name: descriptor.name,
                });
            }
        }
    }

    fn finalize_primary(&mut self) {
        self.phase = AuthPhase::Online;
        for atom in self.sync.begin(&mut self.ids) {
            self.send_primary_atom(atom);
        }
        self.arm_list_retry();
        self.ensure_service(ConnKind::Alerts);
        if self.away.is_some() {
            self.push_away();
        }
        self.emit(SessionEvent::SignedOn {
            screen_name: self.screen_name.clone(),
        });
    }

    fn on_atom(&mut self, id: ConnId, kind: ConnKind, atom: ServerAtom) {
        match atom {
            ServerAtom::HostReady { families } => {
                debug!("[conn] {kind} hosts families {families:04x?}");
            }
            ServerAtom::RateParams { classes } => {
                let rid = self.ids.next_id();
                self.send_frame(id, Frame::Data(proto::service::encode_rate_ack(classes, rid)));
            }
            ServerAtom::Redirect(redirect) => self.on_redirect(redirect),
            ServerAtom::ServiceError { family, code } => {
                warn!("[conn] {kind} reported error {code:#06x} for family {family:#06x}");
            }
            ServerAtom::SignOnReply(outcome) => self.on_sign_on_reply(id, outcome),
            ServerAtom::AuthKey { key } => self.on_auth_key(id, key),
            ServerAtom::BuddyArrived(info) => self.on_buddy_arrived(info),
            ServerAtom::BuddyDeparted { screen_name } => {
                self.emit(SessionEvent::ContactOffline { screen_name });
            }
            ServerAtom::MessageReceived(message) => self.on_message(message),
            ServerAtom::MessageAcked { request_id, .. } => {
                if let Some(to) = self.pending_messages.remove(&request_id) {
                    self.emit(SessionEvent::MessageDelivered { to });
                }
            }
            ServerAtom::MessageFailed { request_id, code } => {
                if let Some(to) = self.pending_messages.remove(&request_id) {
                    self.emit(SessionEvent::MessageFailed {
                        to,
                        reason: proto::icbm::failure_reason(code).to_owned(),
                    });
                }
            }
            ServerAtom::TypingNotice { screen_name, state } => {
                self.contact_state(&screen_name).typing_capable = true;
                self.emit(SessionEvent::TypingChanged { screen_name, state });
            }
            ServerAtom::AdminInfoReply { email } => match email {
                Some(email) => self.emit(SessionEvent::EmailInfo { email }),
                None => debug!("[admin] info reply without an email address"),
            },
            ServerAtom::AdminChangeReply { ok, error_code } => {
                self.emit(SessionEvent::AdminChangeDone { ok, error_code });
            }
            ServerAtom::ChatNavRights { max_rooms } => {
                debug!("[chat] navigation allows {max_rooms} rooms");
                self.max_rooms = Some(max_rooms);
            }
            ServerAtom::RoomInfo(descriptor) => self.on_room_info(descriptor),
            ServerAtom::ChatUsersJoined { users } => self.on_room_roster(id, users, Vec::new()),
            ServerAtom::ChatUsersLeft { users } => self.on_room_roster(id, Vec::new(), users),
            ServerAtom::ChatMessageReceived(message) => self.on_room_message(id, message),
            ServerAtom::IconUploadAck { checksum } => {
                self.emit(SessionEvent::OwnIconAccepted { checksum });
            }
            ServerAtom::IconReply {
                screen_name,
                checksum,
                data,
            } => {
                debug!(
                    "[icon] received icon for {screen_name:?} (checksum {checksum:#06x}, {} bytes)",
                    data.len()
                );
                self.emit(SessionEvent::IconUpdated {
                    screen_name,
                    data: Bytes::from(data),
                });
            }
            ServerAtom::SsiRights(rights) => self.sync.handle_rights(rights),
            ServerAtom::SsiList { items, more_follows } => self.on_list_chunk(items, more_follows),
            ServerAtom::SsiAck { request_id, codes } => self.on_list_ack(request_id, codes),
            ServerAtom::SsiError { code } => {
                if self.sync.handle_error(code) {
                    debug!("[list] download rate limited; retrying in {LIST_RETRY_DELAY:?}");
                    self.arm_list_retry();
                } else {
                    warn!("[list] server error {code:#06x}");
                }
            }
            ServerAtom::AuthRequested { screen_name, reason } => {
                let name = screen_name.clone();
                self.prompt(
                    move |respond| SessionEvent::AuthRequested {
                        from: screen_name,
                        reason,
                        respond,
                    },
                    move |grant| Command::AuthVerdict { name, grant },
                );
            }
            ServerAtom::MailStatus { unread_count } => {
                self.emit(SessionEvent::MailWaiting {
                    unread: unread_count,
                });
            }
        }
    }

    // ── sign-on ──────────────────────────────────────────────────────

    fn on_auth_key(&mut self, id: ConnId, key: Vec<u8>) {
        if key.is_empty() {
            info!("[auth] server offers no digest challenge; asking before sending the password in the clear");
            self.phase = AuthPhase::AwaitingConsent;
            self.prompt(
                |respond| SessionEvent::PlaintextAuthPrompt { respond },
                |proceed| Command::PlaintextConsent { proceed },
            );
            return;
        }
        let digest = proto::auth::digest_credentials(&key, &self.password, &self.config.client_id);
        let rid = self.ids.next_id();
        let atom =
            proto::auth::encode_login(&self.screen_name, &digest, &self.config.client_id, rid);
        self.send_frame(id, Frame::Data(atom));
        self.phase = AuthPhase::LoginSent;
    }

    fn on_sign_on_reply(&mut self, id: ConnId, outcome: SignOnOutcome) {
        if let Some(error) = outcome.error {
            warn!("[auth] sign-on refused: {error}");
            self.emit(SessionEvent::SignOnFailed { error });
            self.teardown(Some(format!("sign-on refused: {error}")));
            return;
        }
        let (Some(host), Some(cookie)) = (outcome.host, outcome.cookie) else {
            self.teardown(Some("sign-on reply missing redirect target".to_owned()));
            return;
        };
        if let Some(name) = outcome.screen_name {
            // The server-formatted spelling wins.
            self.screen_name = name;
        }
        // The credential server's job is done; drop it before dialing on so
        // its close is not mistaken for a failure.
        if let Some(entry) = self.conns.remove(&id) {
            entry.conn.send(Frame::Close);
            entry.conn.disconnect();
        }
        info!("[auth] credentials accepted; continuing at {host}");
        self.phase = AuthPhase::Redirecting;
        // The mail service subscribes with the same cookie the sign-on
        // issued.
        self.mail_cookies.push(cookie.clone());
        // The reply is a primary-service redirect in all but name.
        self.on_redirect(Redirect {
            service: family::SERVICE,
            host,
            cookie,
            encrypt: self.config.require_encryption,
            room: None,
        });
    }

    // ── redirects ────────────────────────────────────────────────────

    fn on_redirect(&mut self, redirect: Redirect) {
        let Some(kind) = ConnKind::from_service_id(redirect.service) else {
            debug!("[conn] redirect for unknown service {:#06x}", redirect.service);
            return;
        };
        let (host, port) = parse_host_port(&redirect.host, self.config.port);
        let mut secure = redirect.encrypt;
        if secure && kind.rejects_encryption() {
            info!("[conn] {kind} service does not take encrypted links; continuing in the clear");
            secure = false;
        }

        let room = if kind == ConnKind::Chat {
            let Some(descriptor) = redirect.room else {
                warn!("[chat] room redirect without a descriptor");
                return;
            };
            let Some(room) = self.rooms.iter().find_map(|(room, r)| {
                (r.conn.is_none()
                    && r.descriptor.exchange == descriptor.exchange
                    && r.descriptor.name.eq_ignore_ascii_case(&descriptor.name))
                .then_some(*room)
            }) else {
                warn!("[chat] redirect for unrequested room {:?}", descriptor.name);
                return;
            };
            if let Some(state) = self.rooms.get_mut(&room) {
                state.descriptor = descriptor;
            }
            Some(room)
        } else {
            // At most one connection per non-chat kind.
            if self.conns.values().any(|e| e.conn.kind() == kind) {
                debug!("[conn] already holding a {kind} connection; ignoring redirect");
                return;
            }
            None
        };

        let target = ConnTarget {
            host,
            port,
            secure,
            cookie: Some(redirect.cookie),
        };
        self.spawn_conn(kind, target, room);
    }

    // ── presence and messaging ───────────────────────────────────────

    fn on_buddy_arrived(&mut self, info: UserInfo) {
        let key = normalize_name(&info.screen_name);
        let refetch = {
            let state = self.contacts.entry(key).or_default();
            state.typing_capable = info.supports_typing();
            state.wide_capable = info.supports_wide_text();
            state.address = info.address;
            let changed = match (&state.icon, &info.icon_info) {
                (Some(old), Some(new)) => old.checksum != new.checksum,
                (None, Some(_)) => true,
                _ => false,
            };
            state.icon = info.icon_info.clone();
            // Refresh only icons somebody asked for.
            if changed && state.icon_requested {
                state.icon_requested = false;
                true
            } else {
                false
            }
        };
        if refetch {
            self.wanted_icons.push(info.screen_name.clone());
            match self.ready_conn(ConnKind::Icon) {
                Some(_) => self.flush_icon_requests(),
                None => self.ensure_service(ConnKind::Icon),
            }
        }
        self.emit(SessionEvent::ContactOnline { info });
    }

    fn on_message(&mut self, message: proto::icbm::IncomingMessage) {
        let sender = message.sender.screen_name.clone();
        {
            let state = self.contact_state(&sender);
            if message.sender.supports_typing() {
                state.typing_capable = true;
            }
            if message.sender.supports_wide_text() {
                state.wide_capable = true;
            }
        }
        let decoded = decode_incoming(
            message.encoding.as_deref(),
            &message.bytes,
            &self.config.legacy_encoding,
        );
        self.emit(SessionEvent::MessageReceived {
            sender,
            text: decoded.text,
            note: decoded.note,
        });
    }

    // ── chat rooms ───────────────────────────────────────────────────

    fn on_room_info(&mut self, descriptor: proto::service::RoomDescriptor) {
        let Some(room) = self.rooms.iter().find_map(|(room, r)| {
            (r.conn.is_none()
                && r.descriptor.exchange == descriptor.exchange
                && r.descriptor.name.eq_ignore_ascii_case(&descriptor.name))
            .then_some(*room)
        }) else {
            debug!("[chat] details for unrequested room {:?}", descriptor.name);
            return;
        };
        if let Some(state) = self.rooms.get_mut(&room) {
            state.descriptor = descriptor.clone();
        }
        let rid = self.ids.next_id();
        self.send_primary_atom(proto::service::encode_service_request(
            family::CHAT,
            Some(&descriptor),
            rid,
        ));
    }

    fn on_room_roster(&mut self, id: ConnId, joined: Vec<UserInfo>, left: Vec<UserInfo>) {
        let Some(room) = self.conns.get(&id).and_then(|e| e.room) else {
            return;
        };
        self.emit(SessionEvent::RoomRosterChanged {
            room,
            joined: joined.into_iter().map(|u| u.screen_name).collect(),
            left: left.into_iter().map(|u| u.screen_name).collect(),
        });
    }

    fn on_room_message(&mut self, id: ConnId, message: proto::chat::IncomingRoomMessage) {
        let Some(room) = self.conns.get(&id).and_then(|e| e.room) else {
            return;
        };
        let decoded = decode_incoming(
            message.encoding.as_deref(),
            &message.bytes,
            &self.config.legacy_encoding,
        );
        self.emit(SessionEvent::RoomMessage {
            room,
            sender: message.sender.screen_name,
            text: decoded.text,
        });
    }

    // ── contact list ─────────────────────────────────────────────────

    fn on_list_chunk(&mut self, items: Vec<proto::ssi::SsiItem>, more_follows: bool) {
        if !self.sync.handle_chunk(items, more_follows) {
            return;
        }
        self.cancel_list_retry();
        info!("[list] download complete ({} items)", self.sync.mirror().len());
        if self.sync.needs_reconcile() {
            self.run_reconciliation();
        }
        self.emit(SessionEvent::ListSynchronized);
    }

    /// One-time merge of the local view into the server's list after the
    /// first full download.
    fn run_reconciliation(&mut self) {
        let plan = reconcile(self.sync.mirror(), &self.view, &self.screen_name, self.show_idle);

        for name in &plan.hide {
            if self.view.remove_contact(name).is_some() {
                self.emit(SessionEvent::ContactHidden { name: name.clone() });
            }
        }
        for show in &plan.show {
            self.view
                .upsert_contact(&show.name, &show.group, show.alias.as_deref());
            self.emit(SessionEvent::ContactShown {
                name: show.name.clone(),
                group: show.group.clone(),
                alias: show.alias.clone(),
            });
        }
        if let Some(hint) = plan.capability_hint.clone() {
            debug!("[list] server copy carries capability hint {hint:?}");
            self.capability_hint = Some(hint);
        }

        let privacy_changed = !plan.add_permits.is_empty()
            || !plan.remove_permits.is_empty()
            || !plan.add_denies.is_empty()
            || !plan.remove_denies.is_empty();
        for name in &plan.add_permits {
            self.view.add_permit(name);
        }
        for name in &plan.remove_permits {
            self.view.remove_permit(name);
        }
        for name in &plan.add_denies {
            self.view.add_deny(name);
        }
        for name in &plan.remove_denies {
            self.view.remove_deny(name);
        }
        if privacy_changed {
            self.emit_privacy();
        }

        if plan.write_back_idle {
            debug!("[list] stored idle visibility disagrees with the local preference; writing back");
            if let Some(atom) = self.sync.set_idle_visibility(&mut self.ids, plan.idle_visible) {
                self.send_primary_atom(atom);
            }
        }

        let activate = self.sync.activate(&mut self.ids);
        self.send_primary_atom(activate);
        self.sync.mark_reconciled();
    }

    fn on_list_ack(&mut self, request_id: u16, codes: Vec<u16>) {
        let Some(outcome) = self.sync.handle_ack(request_id, &codes, &mut self.ids) else {
            debug!("[list] ack for unknown request {request_id}");
            return;
        };
        match outcome {
            AckDisposition::Committed { label, .. } => debug!("[list] {label} committed"),
            AckDisposition::Activated { ok } => {
                if ok {
                    debug!("[list] list activated");
                } else {
                    warn!("[list] activation refused");
                }
            }
            AckDisposition::Failed { label, items, error } => {
                warn!("[list] {label} refused: {error}");
                self.rollback_items(&items);
                self.emit(SessionEvent::ListEditFailed {
                    subject: label,
                    error,
                });
            }
            AckDisposition::NeedsAuth { contact, atoms } => {
                info!("[list] {contact:?} requires authorization; asking and retrying the add");
                for atom in atoms {
                    self.send_primary_atom(atom);
                }
                self.emit(SessionEvent::AuthorizationSent { to: contact });
            }
        }
    }

    /// Restores the view for every item touched by a refused edit, by
    /// re-projecting from the untouched mirror.
    fn rollback_items(&mut self, items: &[proto::ssi::SsiItem]) {
        for item in items {
            match item.item_type {
                item_type::CONTACT => self.reproject_contact(&item.name),
                item_type::GROUP => self.reproject_group(item.group_id),
                item_type::PERMIT => self.reproject_privacy(&item.name, false),
                item_type::DENY => self.reproject_privacy(&item.name, true),
                _ => {}
            }
        }
    }

    fn reproject_contact(&mut self, name: &str) {
        let mirror = self.sync.mirror();
        let restored = mirror.find_contact(name).map(|item| {
            let group = mirror.group_name(item.group_id).to_owned();
            (item.name.clone(), group, item.alias())
        });
        match restored {
            Some((name, group, alias)) => {
                self.view.upsert_contact(&name, &group, alias.as_deref());
                self.emit(SessionEvent::ContactShown { name, group, alias });
            }
            None => {
                if self.view.remove_contact(name).is_some() {
                    self.emit(SessionEvent::ContactHidden {
                        name: name.to_owned(),
                    });
                }
            }
        }
    }

    fn reproject_group(&mut self, group_id: u16) {
        let mirror = self.sync.mirror();
        let members: Vec<_> = mirror
            .contacts()
            .filter(|c| c.group_id == group_id)
            .map(|c| {
                (
                    c.name.clone(),
                    mirror.group_name(c.group_id).to_owned(),
                    c.alias(),
                )
            })
            .collect();
        for (name, group, alias) in members {
            self.view.upsert_contact(&name, &group, alias.as_deref());
            self.emit(SessionEvent::ContactShown { name, group, alias });
        }
    }

    fn reproject_privacy(&mut self, name: &str, deny: bool) {
        let ty = if deny { item_type::DENY } else { item_type::PERMIT };
        let on_server = self.sync.mirror().find_of_type(ty, name).is_some();
        match (deny, on_server) {
            (true, true) => self.view.add_deny(name),
            (true, false) => self.view.remove_deny(name),
            (false, true) => self.view.add_permit(name),
            (false, false) => self.view.remove_permit(name),
        }
        self.emit_privacy();
    }
}
