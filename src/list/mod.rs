//! Server-authoritative contact list.
//!
//! The server's copy of the list is the source of truth. We keep a local
//! [`Mirror`] of it, project the parts worth showing into a [`VisibleList`],
//! and push edits through [`sync::Synchronizer`] so the mirror only ever
//! changes on a server acknowledgement.

pub mod reconcile;
pub mod sync;

use std::collections::BTreeMap;

use crate::constants::{item_type, ORPHAN_GROUP_NAME};
use crate::proto::normalize_name;
use crate::proto::ssi::SsiItem;

pub use reconcile::{reconcile, ReconcilePlan, ShowContact};
pub use sync::{AckDisposition, SyncState, Synchronizer};

/// Local replica of the server-side list. Mutated only from acknowledged
/// operations and from full list downloads, never from optimistic edits.
#[derive(Debug, Default)]
pub struct Mirror {
    items: Vec<SsiItem>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn extend(&mut self, items: Vec<SsiItem>) {
        self.items.extend(items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &SsiItem> {
        self.items.iter()
    }

    pub fn contacts(&self) -> impl Iterator<Item = &SsiItem> {
        self.items
            .iter()
            .filter(|i| i.item_type == item_type::CONTACT)
    }

    fn of_type(&self, ty: u16) -> impl Iterator<Item = &SsiItem> {
        self.items.iter().filter(move |i| i.item_type == ty)
    }

    pub fn permits(&self) -> impl Iterator<Item = &SsiItem> {
        self.of_type(item_type::PERMIT)
    }

    pub fn denies(&self) -> impl Iterator<Item = &SsiItem> {
        self.of_type(item_type::DENY)
    }

    pub fn presence_item(&self) -> Option<&SsiItem> {
        self.of_type(item_type::PRESENCE).next()
    }

    /// Resolves a group id to its name, falling back to the orphan group
    /// for ids no group item names.
    pub fn group_name(&self, group_id: u16) -> &str {
        self.items
            .iter()
            .find(|i| {
                i.item_type == item_type::GROUP && i.group_id == group_id && i.group_id != 0
            })
            .map(|i| i.name.as_str())
            .unwrap_or(ORPHAN_GROUP_NAME)
    }

    pub fn find_group(&self, name: &str) -> Option<&SsiItem> {
        self.of_type(item_type::GROUP)
            .find(|i| i.group_id != 0 && i.name.eq_ignore_ascii_case(name))
    }

    pub fn find_contact(&self, name: &str) -> Option<&SsiItem> {
        let norm = normalize_name(name);
        self.contacts().find(|i| normalize_name(&i.name) == norm)
    }

    pub fn find_of_type(&self, ty: u16, name: &str) -> Option<&SsiItem> {
        let norm = normalize_name(name);
        self.of_type(ty).find(|i| normalize_name(&i.name) == norm)
    }

    pub fn get(&self, group_id: u16, item_id: u16, ty: u16) -> Option<&SsiItem> {
        self.items
            .iter()
            .find(|i| i.group_id == group_id && i.item_id == item_id && i.item_type == ty)
    }

    /// Allocates a group id no existing group uses. Zero is reserved for
    /// the top-level container.
    pub fn next_group_id(&self) -> u16 {
        let mut id: u16 = 1;
        while self
            .items
            .iter()
            .any(|i| i.item_type == item_type::GROUP && i.group_id == id)
        {
            id = id.wrapping_add(1).max(1);
        }
        id
    }

    /// Allocates an item id unused by any item in the list. Servers only
    /// require uniqueness within a group, but globally unique ids make
    /// moves and rollbacks unambiguous.
    pub fn next_item_id(&self) -> u16 {
        let mut id: u16 = 1;
        while self.items.iter().any(|i| i.item_id == id) {
            id = id.wrapping_add(1).max(1);
        }
        id
    }

    pub fn insert(&mut self, item: SsiItem) {
        self.items.push(item);
    }

    /// Replaces the item with the same (group, id, type) key, or inserts
    /// when no such item exists.
    pub fn replace(&mut self, item: SsiItem) {
        match self.items.iter_mut().find(|i| {
            i.group_id == item.group_id && i.item_id == item.item_id && i.item_type == item.item_type
        }) {
            Some(slot) => *slot = item,
            None => self.items.push(item),
        }
    }

    pub fn remove(&mut self, group_id: u16, item_id: u16, ty: u16) -> Option<SsiItem> {
        let pos = self
            .items
            .iter()
            .position(|i| i.group_id == group_id && i.item_id == item_id && i.item_type == ty)?;
        Some(self.items.remove(pos))
    }
}

/// A contact as shown to the embedding client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleContact {
    /// Display form of the screen name, as the server stored it.
    pub name: String,
    pub group: String,
    pub alias: Option<String>,
}

/// The externally visible projection of the list. The session updates it
/// optimistically on local edits and re-projects from the mirror when an
/// edit fails.
#[derive(Debug, Default)]
pub struct VisibleList {
    contacts: BTreeMap<String, VisibleContact>,
    permits: BTreeMap<String, String>,
    denies: BTreeMap<String, String>,
}

impl VisibleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contact(&self, name: &str) -> Option<&VisibleContact> {
        self.contacts.get(&normalize_name(name))
    }

    pub fn contacts(&self) -> impl Iterator<Item = &VisibleContact> {
        self.contacts.values()
    }

    pub fn upsert_contact(&mut self, name: &str, group: &str, alias: Option<&str>) {
        self.contacts.insert(
            normalize_name(name),
            VisibleContact {
                name: name.to_owned(),
                group: group.to_owned(),
                alias: alias.map(str::to_owned),
            },
        );
    }

    pub fn remove_contact(&mut self, name: &str) -> Option<VisibleContact> {
        self.contacts.remove(&normalize_name(name))
    }

    pub fn has_permit(&self, name: &str) -> bool {
        self.permits.contains_key(&normalize_name(name))
    }

    pub fn has_deny(&self, name: &str) -> bool {
        self.denies.contains_key(&normalize_name(name))
    }

    pub fn permits(&self) -> impl Iterator<Item = &str> {
        self.permits.values().map(String::as_str)
    }

    pub fn denies(&self) -> impl Iterator<Item = &str> {
        self.denies.values().map(String::as_str)
    }

    pub fn add_permit(&mut self, name: &str) {
        self.permits.insert(normalize_name(name), name.to_owned());
    }

    pub fn remove_permit(&mut self, name: &str) {
        self.permits.remove(&normalize_name(name));
    }

    pub fn add_deny(&mut self, name: &str) {
        self.denies.insert(normalize_name(name), name.to_owned());
    }

    pub fn remove_deny(&mut self, name: &str) {
        self.denies.remove(&normalize_name(name));
    }
}

/// Why a list edit was rejected by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEditError {
    /// The server-advertised item limit is reached.
    ListFull,
    /// Any other non-success acknowledgement code.
    Refused(u16),
}

impl std::fmt::Display for ListEditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListEditError::ListFull => write!(f, "contact list is full"),
            ListEditError::Refused(code) => write!(f, "edit refused by server (code {code:#06x})"),
        }
    }
}

impl std::error::Error for ListEditError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(group_id: u16, item_id: u16, name: &str) -> SsiItem {
        SsiItem::contact(group_id, item_id, name)
    }

    #[test]
    fn group_name_falls_back_to_orphans() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::group(3, "Friends"));
        assert_eq!(mirror.group_name(3), "Friends");
        assert_eq!(mirror.group_name(9), ORPHAN_GROUP_NAME);
    }

    #[test]
    fn find_contact_ignores_case_and_spaces() {
        let mut mirror = Mirror::new();
        mirror.insert(contact(3, 10, "Screen Name"));
        assert!(mirror.find_contact("screenname").is_some());
        assert!(mirror.find_contact("SCREEN NAME").is_some());
        assert!(mirror.find_contact("other").is_none());
    }

    #[test]
    fn id_allocation_skips_used_ids() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::group(1, "A"));
        mirror.insert(SsiItem::group(2, "B"));
        mirror.insert(contact(1, 1, "x"));
        mirror.insert(contact(1, 2, "y"));
        assert_eq!(mirror.next_group_id(), 3);
        assert_eq!(mirror.next_item_id(), 3);
    }

    #[test]
    fn replace_updates_in_place() {
        let mut mirror = Mirror::new();
        mirror.insert(contact(1, 5, "buddy"));
        let mut updated = contact(1, 5, "buddy");
        updated.set_alias(Some("pal"));
        mirror.replace(updated);
        assert_eq!(mirror.len(), 1);
        assert_eq!(
            mirror.find_contact("buddy").and_then(|i| i.alias()),
            Some("pal".to_owned())
        );
    }

    #[test]
    fn visible_list_keys_by_normalized_name() {
        let mut view = VisibleList::new();
        view.upsert_contact("Screen Name", "Friends", None);
        assert!(view.contact("screenname").is_some());
        view.remove_contact("SCREENNAME");
        assert!(view.contact("Screen Name").is_none());
    }
}
