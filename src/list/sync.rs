//! Download and edit pipeline for the server-side list.
//!
//! The [`Synchronizer`] walks the list through its download states, keeps
//! every in-flight edit keyed by request id, and applies an edit to the
//! mirror only once the server acknowledges it.

use std::collections::HashMap;

use log::{debug, warn};

use crate::codec::atom::Atom;
use crate::constants::{item_type, presence_flags, ssi_ack, RATE_LIMIT_CODE};
use crate::list::{ListEditError, Mirror};
use crate::proto::ssi::{
    encode_activate, encode_add, encode_auth_request, encode_data_request, encode_delete,
    encode_modify, encode_rights_request, ListRights, SsiItem,
};
use crate::proto::RequestIds;

/// Progress of the initial list download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    RightsRequested,
    DataRequested,
    /// A rate-limited request is waiting out the retry delay.
    RetryScheduled,
    Synchronized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Add,
    Modify,
    Delete,
    Activate,
}

#[derive(Debug)]
struct PendingOp {
    kind: PendingKind,
    items: Vec<SsiItem>,
    /// Human-readable subject for log lines and failure events.
    label: String,
    /// Set once an authorization-required rejection already triggered the
    /// single awaiting-authorization retry.
    auth_retried: bool,
}

/// What the session should do with an acknowledged operation.
#[derive(Debug)]
pub enum AckDisposition {
    /// The mirror now includes the edit. `items` are the acknowledged items.
    Committed { label: String, items: Vec<SsiItem> },
    /// The server rejected the edit; the view must be re-projected from the
    /// mirror for the affected items.
    Failed {
        label: String,
        items: Vec<SsiItem>,
        error: ListEditError,
    },
    /// The contact wants authorization first. `atoms` carry the request and
    /// the one retry with the awaiting-authorization attribute set.
    NeedsAuth { contact: String, atoms: Vec<Atom> },
    /// The activation round-trip finished.
    Activated { ok: bool },
}

#[derive(Debug)]
pub struct Synchronizer {
    state: SyncState,
    mirror: Mirror,
    rights: Option<ListRights>,
    pending: HashMap<u16, PendingOp>,
    /// Mid multi-chunk download; cleared whenever the data request is
    /// (re)issued so a fresh download replaces a partial one.
    receiving: bool,
    reconciled: bool,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self {
            state: SyncState::Uninitialized,
            mirror: Mirror::new(),
            rights: None,
            pending: HashMap::new(),
            receiving: false,
            reconciled: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Synchronized
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn max_items(&self) -> u16 {
        self.rights.as_ref().map(|r| r.max_items).unwrap_or(u16::MAX)
    }

    /// True until the one-time reconciliation pass has run.
    pub fn needs_reconcile(&self) -> bool {
        self.is_synchronized() && !self.reconciled
    }

    pub fn mark_reconciled(&mut self) {
        self.reconciled = true;
    }

    /// Issues the rights and data requests that start the download.
    pub fn begin(&mut self, ids: &mut RequestIds) -> Vec<Atom> {
        self.state = SyncState::RightsRequested;
        self.receiving = false;
        vec![
            encode_rights_request(ids.next_id()),
            encode_data_request(ids.next_id()),
        ]
    }

    pub fn handle_rights(&mut self, rights: ListRights) {
        debug!("[list] rights: up to {} items", rights.max_items);
        self.rights = Some(rights);
        if self.state == SyncState::RightsRequested {
            self.state = SyncState::DataRequested;
        }
    }

    /// Folds one list chunk into the mirror. Returns true when the chunk
    /// was the last one and the list is now synchronized.
    pub fn handle_chunk(&mut self, items: Vec<SsiItem>, more_follows: bool) -> bool {
        if !self.receiving {
            self.mirror.clear();
            self.receiving = true;
        }
        self.mirror.extend(items);
        if more_follows {
            return false;
        }
        self.receiving = false;
        self.state = SyncState::Synchronized;
        debug!("[list] download complete: {} items", self.mirror.len());
        true
    }

    /// Reacts to a list-family error atom. Returns true when the error was
    /// the rate-limit code and the download should be retried after the
    /// fixed delay.
    pub fn handle_error(&mut self, code: u16) -> bool {
        let retryable = code == RATE_LIMIT_CODE
            && matches!(
                self.state,
                SyncState::RightsRequested | SyncState::DataRequested | SyncState::RetryScheduled
            );
        if retryable {
            self.state = SyncState::RetryScheduled;
            self.receiving = false;
        } else {
            warn!("[list] server error {code:#06x} in state {:?}", self.state);
        }
        retryable
    }

    /// Re-issues the outstanding download requests when the retry timer
    /// fires. Returns nothing once the list is synchronized.
    pub fn retry_due(&mut self, ids: &mut RequestIds) -> Vec<Atom> {
        match self.state {
            SyncState::Uninitialized | SyncState::Synchronized => Vec::new(),
            SyncState::RightsRequested | SyncState::DataRequested | SyncState::RetryScheduled => {
                self.receiving = false;
                let mut atoms = Vec::new();
                if self.rights.is_none() {
                    self.state = SyncState::RightsRequested;
                    atoms.push(encode_rights_request(ids.next_id()));
                } else {
                    self.state = SyncState::DataRequested;
                }
                atoms.push(encode_data_request(ids.next_id()));
                atoms
            }
        }
    }

    /// Item-id allocation that also skips ids used by unacknowledged
    /// operations, since the mirror does not know about those yet.
    fn alloc_item_id(&self) -> u16 {
        let mut id = self.mirror.next_item_id();
        while self.id_in_flight(id) {
            id = id.wrapping_add(1).max(1);
            while self.mirror.items().any(|i| i.item_id == id) {
                id = id.wrapping_add(1).max(1);
            }
        }
        id
    }

    fn id_in_flight(&self, id: u16) -> bool {
        self.pending
            .values()
            .any(|p| p.items.iter().any(|i| i.item_id == id))
    }

    fn alloc_group_id(&self) -> u16 {
        let mut id = self.mirror.next_group_id();
        while self.pending.values().any(|p| {
            p.items
                .iter()
                .any(|i| i.item_type == item_type::GROUP && i.group_id == id)
        }) {
            id = id.wrapping_add(1).max(1);
        }
        id
    }

    fn track(&mut self, request_id: u16, kind: PendingKind, items: Vec<SsiItem>, label: &str) {
        self.pending.insert(
            request_id,
            PendingOp {
                kind,
                items,
                label: label.to_owned(),
                auth_retried: false,
            },
        );
    }

    /// Queues an add of `name` into `group`, creating the group first when
    /// the mirror has no group of that name.
    pub fn add_contact(
        &mut self,
        ids: &mut RequestIds,
        name: &str,
        group: &str,
        alias: Option<&str>,
    ) -> Vec<Atom> {
        let mut atoms = Vec::new();
        let group_id = match self.mirror.find_group(group) {
            Some(g) => g.group_id,
            None => {
                let group_id = self.alloc_group_id();
                let item = SsiItem::group(group_id, group);
                let id = ids.next_id();
                self.track(id, PendingKind::Add, vec![item.clone()], group);
                atoms.push(encode_add(&[item], id));
                group_id
            }
        };
        let mut item = SsiItem::contact(group_id, self.alloc_item_id(), name);
        item.set_alias(alias);
        let id = ids.next_id();
        self.track(id, PendingKind::Add, vec![item.clone()], name);
        atoms.push(encode_add(&[item], id));
        atoms
    }

    pub fn remove_contact(&mut self, ids: &mut RequestIds, name: &str) -> Option<Atom> {
        let item = self.mirror.find_contact(name)?.clone();
        let id = ids.next_id();
        self.track(id, PendingKind::Delete, vec![item.clone()], name);
        Some(encode_delete(&[item], id))
    }

    /// Moves a contact to another group as a delete plus add, carrying the
    /// contact's attributes along.
    pub fn move_contact(&mut self, ids: &mut RequestIds, name: &str, group: &str) -> Vec<Atom> {
        let Some(existing) = self.mirror.find_contact(name).cloned() else {
            return Vec::new();
        };
        let mut atoms = Vec::new();
        let group_id = match self.mirror.find_group(group) {
            Some(g) => g.group_id,
            None => {
                let group_id = self.alloc_group_id();
                let item = SsiItem::group(group_id, group);
                let id = ids.next_id();
                self.track(id, PendingKind::Add, vec![item.clone()], group);
                atoms.push(encode_add(&[item], id));
                group_id
            }
        };
        if group_id == existing.group_id {
            return atoms;
        }
        let id = ids.next_id();
        self.track(id, PendingKind::Delete, vec![existing.clone()], name);
        atoms.push(encode_delete(&[existing.clone()], id));

        let mut moved = existing;
        moved.group_id = group_id;
        moved.item_id = self.alloc_item_id();
        let id = ids.next_id();
        self.track(id, PendingKind::Add, vec![moved.clone()], name);
        atoms.push(encode_add(&[moved], id));
        atoms
    }

    pub fn set_alias(&mut self, ids: &mut RequestIds, name: &str, alias: Option<&str>) -> Option<Atom> {
        let mut item = self.mirror.find_contact(name)?.clone();
        item.set_alias(alias);
        let id = ids.next_id();
        self.track(id, PendingKind::Modify, vec![item.clone()], name);
        Some(encode_modify(&[item], id))
    }

    pub fn rename_group(&mut self, ids: &mut RequestIds, old: &str, new: &str) -> Option<Atom> {
        let mut item = self.mirror.find_group(old)?.clone();
        item.name = new.to_owned();
        let id = ids.next_id();
        self.track(id, PendingKind::Modify, vec![item.clone()], new);
        Some(encode_modify(&[item], id))
    }

    pub fn add_privacy(&mut self, ids: &mut RequestIds, name: &str, deny: bool) -> Atom {
        let item = if deny {
            SsiItem::deny(self.alloc_item_id(), name)
        } else {
            SsiItem::permit(self.alloc_item_id(), name)
        };
        let id = ids.next_id();
        self.track(id, PendingKind::Add, vec![item.clone()], name);
        encode_add(&[item], id)
    }

    pub fn remove_privacy(&mut self, ids: &mut RequestIds, name: &str, deny: bool) -> Option<Atom> {
        let ty = if deny { item_type::DENY } else { item_type::PERMIT };
        let item = self.mirror.find_of_type(ty, name)?.clone();
        let id = ids.next_id();
        self.track(id, PendingKind::Delete, vec![item.clone()], name);
        Some(encode_delete(&[item], id))
    }

    /// Writes the idle-visibility bit to the server. Returns nothing when
    /// the stored flags already match.
    pub fn set_idle_visibility(&mut self, ids: &mut RequestIds, show: bool) -> Option<Atom> {
        match self.mirror.presence_item() {
            Some(existing) => {
                let flags = existing.presence_flags().unwrap_or(0);
                let updated = if show {
                    flags | presence_flags::SHOW_IDLE
                } else {
                    flags & !presence_flags::SHOW_IDLE
                };
                if updated == flags {
                    return None;
                }
                let mut item = existing.clone();
                item.set_presence_flags(updated);
                let id = ids.next_id();
                self.track(id, PendingKind::Modify, vec![item.clone()], "presence");
                Some(encode_modify(&[item], id))
            }
            None => {
                if !show {
                    return None;
                }
                let item =
                    SsiItem::presence(self.alloc_item_id(), presence_flags::SHOW_IDLE);
                let id = ids.next_id();
                self.track(id, PendingKind::Add, vec![item.clone()], "presence");
                Some(encode_add(&[item], id))
            }
        }
    }

    pub fn activate(&mut self, ids: &mut RequestIds) -> Atom {
        let id = ids.next_id();
        self.track(id, PendingKind::Activate, Vec::new(), "activate");
        encode_activate(id)
    }

    /// Resolves a pending operation against its acknowledgement codes.
    /// Returns nothing for acks that match no tracked request.
    pub fn handle_ack(
        &mut self,
        request_id: u16,
        codes: &[u16],
        ids: &mut RequestIds,
    ) -> Option<AckDisposition> {
        let op = self.pending.remove(&request_id)?;
        let failure = codes.iter().copied().find(|c| *c != ssi_ack::SUCCESS);

        if op.kind == PendingKind::Activate {
            if let Some(code) = failure {
                warn!("[list] activation refused (code {code:#06x})");
            }
            return Some(AckDisposition::Activated { ok: failure.is_none() });
        }

        match failure {
            None => {
                for item in &op.items {
                    match op.kind {
                        PendingKind::Add => self.mirror.insert(item.clone()),
                        PendingKind::Modify => self.mirror.replace(item.clone()),
                        PendingKind::Delete => {
                            self.mirror.remove(item.group_id, item.item_id, item.item_type);
                        }
                        PendingKind::Activate => unreachable!(),
                    }
                }
                Some(AckDisposition::Committed {
                    label: op.label,
                    items: op.items,
                })
            }
            Some(ssi_ack::AUTH_REQUIRED)
                if op.kind == PendingKind::Add
                    && !op.auth_retried
                    && op.items.iter().any(|i| i.item_type == item_type::CONTACT) =>
            {
                let contact = op.label.clone();
                let mut retry_items = op.items;
                for item in &mut retry_items {
                    if item.item_type == item_type::CONTACT {
                        item.set_awaiting_auth(true);
                    }
                }
                let auth_id = ids.next_id();
                let retry_id = ids.next_id();
                self.pending.insert(
                    retry_id,
                    PendingOp {
                        kind: PendingKind::Add,
                        items: retry_items.clone(),
                        label: contact.clone(),
                        auth_retried: true,
                    },
                );
                let atoms = vec![
                    encode_auth_request(&contact, "", auth_id),
                    encode_add(&retry_items, retry_id),
                ];
                Some(AckDisposition::NeedsAuth { contact, atoms })
            }
            Some(code) => {
                let error = match code {
                    ssi_ack::LIST_FULL => ListEditError::ListFull,
                    other => ListEditError::Refused(other),
                };
                Some(AckDisposition::Failed {
                    label: op.label,
                    items: op.items,
                    error,
                })
            }
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ssi;

    fn request_id(atom: &Atom) -> u16 {
        atom.request_id
    }

    #[test]
    fn download_walks_states_in_order() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        assert_eq!(sync.state(), SyncState::Uninitialized);

        let atoms = sync.begin(&mut ids);
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].subtype, ssi::RIGHTS_REQUEST);
        assert_eq!(atoms[1].subtype, ssi::DATA_REQUEST);
        assert_eq!(sync.state(), SyncState::RightsRequested);

        sync.handle_rights(ListRights { max_items: 200 });
        assert_eq!(sync.state(), SyncState::DataRequested);

        let complete = sync.handle_chunk(vec![SsiItem::group(1, "Friends")], true);
        assert!(complete);
        assert_eq!(sync.state(), SyncState::Synchronized);
        assert!(sync.needs_reconcile());
    }

    #[test]
    fn fresh_download_replaces_partial_chunks() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.begin(&mut ids);
        sync.handle_rights(ListRights { max_items: 200 });
        assert!(!sync.handle_chunk(vec![SsiItem::group(1, "A")], false));

        // A retry between chunks restarts the download from scratch.
        assert!(sync.handle_error(RATE_LIMIT_CODE));
        let atoms = sync.retry_due(&mut ids);
        assert!(!atoms.is_empty());

        assert!(sync.handle_chunk(vec![SsiItem::group(2, "B")], true));
        assert_eq!(sync.mirror().len(), 1);
        assert!(sync.mirror().find_group("B").is_some());
    }

    #[test]
    fn rate_limit_schedules_retry_and_other_codes_do_not() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.begin(&mut ids);
        assert!(sync.handle_error(RATE_LIMIT_CODE));
        assert_eq!(sync.state(), SyncState::RetryScheduled);
        assert!(!sync.handle_error(0x0001));
    }

    #[test]
    fn retry_after_synchronized_is_a_no_op() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.begin(&mut ids);
        sync.handle_rights(ListRights { max_items: 200 });
        sync.handle_chunk(Vec::new(), true);
        assert!(sync.retry_due(&mut ids).is_empty());
    }

    #[test]
    fn ack_success_commits_to_mirror() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.handle_chunk(vec![SsiItem::group(3, "Friends")], true);

        let atoms = sync.add_contact(&mut ids, "buddy", "Friends", Some("pal"));
        assert_eq!(atoms.len(), 1, "existing group must not be re-created");
        assert!(sync.mirror().find_contact("buddy").is_none());

        let disposition = sync.handle_ack(request_id(&atoms[0]), &[ssi_ack::SUCCESS], &mut ids);
        assert!(matches!(disposition, Some(AckDisposition::Committed { .. })));
        let stored = sync.mirror().find_contact("buddy").unwrap();
        assert_eq!(stored.group_id, 3);
        assert_eq!(stored.alias(), Some("pal".to_owned()));
    }

    #[test]
    fn add_into_unknown_group_creates_the_group_first() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.handle_chunk(Vec::new(), true);

        let atoms = sync.add_contact(&mut ids, "buddy", "Work", None);
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].subtype, ssi::ADD);
        assert_eq!(atoms[1].subtype, ssi::ADD);
        assert_eq!(sync.pending_len(), 2);
    }

    #[test]
    fn ack_failure_leaves_mirror_untouched() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.handle_chunk(vec![SsiItem::group(3, "Friends")], true);

        let atoms = sync.add_contact(&mut ids, "buddy", "Friends", None);
        let disposition = sync.handle_ack(request_id(&atoms[0]), &[ssi_ack::LIST_FULL], &mut ids);
        match disposition {
            Some(AckDisposition::Failed { error, .. }) => {
                assert_eq!(error, ListEditError::ListFull);
            }
            other => panic!("unexpected disposition: {other:?}"),
        }
        assert!(sync.mirror().find_contact("buddy").is_none());
    }

    #[test]
    fn auth_required_retries_once_with_attribute() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.handle_chunk(vec![SsiItem::group(3, "Friends")], true);

        let atoms = sync.add_contact(&mut ids, "guarded", "Friends", None);
        let disposition = sync.handle_ack(request_id(&atoms[0]), &[ssi_ack::AUTH_REQUIRED], &mut ids);
        let retry_id = match disposition {
            Some(AckDisposition::NeedsAuth { contact, atoms }) => {
                assert_eq!(contact, "guarded");
                assert_eq!(atoms.len(), 2);
                assert_eq!(atoms[0].subtype, ssi::AUTH_REQUEST);
                assert_eq!(atoms[1].subtype, ssi::ADD);
                atoms[1].request_id
            }
            other => panic!("unexpected disposition: {other:?}"),
        };

        // A second refusal of the retried add must not loop.
        let disposition = sync.handle_ack(retry_id, &[ssi_ack::AUTH_REQUIRED], &mut ids);
        assert!(matches!(
            disposition,
            Some(AckDisposition::Failed {
                error: ListEditError::Refused(ssi_ack::AUTH_REQUIRED),
                ..
            })
        ));
    }

    #[test]
    fn move_reuses_attributes_and_skips_same_group() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        let mut contact = SsiItem::contact(3, 7, "buddy");
        contact.set_alias(Some("pal"));
        sync.handle_chunk(vec![SsiItem::group(3, "Friends"), contact], true);

        assert!(sync.move_contact(&mut ids, "buddy", "Friends").is_empty());

        let atoms = sync.move_contact(&mut ids, "buddy", "Work");
        assert_eq!(atoms.len(), 3);

        for atom in &atoms {
            let disposition = sync.handle_ack(atom.request_id, &[ssi_ack::SUCCESS], &mut ids);
            assert!(matches!(disposition, Some(AckDisposition::Committed { .. })));
        }
        let moved = sync.mirror().find_contact("buddy").unwrap();
        assert_eq!(sync.mirror().group_name(moved.group_id), "Work");
        assert_eq!(moved.alias(), Some("pal".to_owned()));
    }

    #[test]
    fn idle_visibility_writes_only_on_change() {
        let mut ids = RequestIds::new();
        let mut sync = Synchronizer::new();
        sync.handle_chunk(
            vec![SsiItem::presence(9, presence_flags::SHOW_IDLE)],
            true,
        );
        assert!(sync.set_idle_visibility(&mut ids, true).is_none());
        let atom = sync.set_idle_visibility(&mut ids, false).unwrap();
        assert_eq!(atom.subtype, ssi::MODIFY);
    }
}
