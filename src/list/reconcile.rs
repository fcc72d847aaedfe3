//! One-time reconciliation between the freshly downloaded mirror and the
//! externally visible list.
//!
//! Runs exactly once per session, right after the first full download. The
//! output is a [`ReconcilePlan`] the session applies to the view and, for
//! the idle-visibility bit, writes back to the server.

use crate::constants::item_type;
use crate::constants::presence_flags;
use crate::list::{Mirror, VisibleList};
use crate::proto::normalize_name;

/// A contact to create or update in the external view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowContact {
    pub name: String,
    pub group: String,
    pub alias: Option<String>,
}

/// Everything reconciliation wants changed. The plan never mutates the
/// mirror itself; the one server-bound change (the idle bit) goes through
/// the synchronizer like any other edit.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// View contacts with no mirror counterpart, by display name.
    pub hide: Vec<String>,
    /// Mirror contacts missing from the view or shown with stale data.
    pub show: Vec<ShowContact>,
    /// The own entry's comment attribute, when present. Reapplying it is
    /// harmless, so [`ReconcilePlan::is_empty`] ignores it.
    pub capability_hint: Option<String>,
    pub add_permits: Vec<String>,
    pub remove_permits: Vec<String>,
    pub add_denies: Vec<String>,
    pub remove_denies: Vec<String>,
    /// Idle visibility after merging the mirror bit with the local
    /// preference. The preference wins.
    pub idle_visible: bool,
    /// True when the merged idle bit differs from what the mirror stores
    /// and must be written back to the server.
    pub write_back_idle: bool,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.hide.is_empty()
            && self.show.is_empty()
            && self.add_permits.is_empty()
            && self.remove_permits.is_empty()
            && self.add_denies.is_empty()
            && self.remove_denies.is_empty()
            && !self.write_back_idle
    }
}

pub fn reconcile(
    mirror: &Mirror,
    view: &VisibleList,
    own_name: &str,
    show_idle_pref: bool,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan {
        idle_visible: show_idle_pref,
        ..ReconcilePlan::default()
    };
    let own = normalize_name(own_name);

    for contact in view.contacts() {
        if mirror.find_contact(&contact.name).is_none() {
            plan.hide.push(contact.name.clone());
        }
    }

    for item in mirror.contacts() {
        let group = mirror.group_name(item.group_id).to_owned();
        let alias = item.alias();
        let current = view.contact(&item.name);
        let stale = match current {
            None => true,
            Some(v) => v.group != group || v.alias != alias,
        };
        if stale {
            plan.show.push(ShowContact {
                name: item.name.clone(),
                group,
                alias,
            });
        }
        if normalize_name(&item.name) == own {
            if let Some(comment) = item.comment() {
                plan.capability_hint = Some(comment);
            }
        }
    }

    for item in mirror.permits() {
        if !view.has_permit(&item.name) {
            plan.add_permits.push(item.name.clone());
        }
    }
    for name in view.permits() {
        if mirror.find_of_type(item_type::PERMIT, name).is_none() {
            plan.remove_permits.push(name.to_owned());
        }
    }
    for item in mirror.denies() {
        if !view.has_deny(&item.name) {
            plan.add_denies.push(item.name.clone());
        }
    }
    for name in view.denies() {
        if mirror.find_of_type(item_type::DENY, name).is_none() {
            plan.remove_denies.push(name.to_owned());
        }
    }

    let stored_visible = mirror
        .presence_item()
        .and_then(|i| i.presence_flags())
        .map(|f| f & presence_flags::SHOW_IDLE != 0)
        .unwrap_or(false);
    plan.write_back_idle = stored_visible != show_idle_pref;

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ssi::SsiItem;

    fn apply(plan: &ReconcilePlan, view: &mut VisibleList) {
        for name in &plan.hide {
            view.remove_contact(name);
        }
        for c in &plan.show {
            view.upsert_contact(&c.name, &c.group, c.alias.as_deref());
        }
        for n in &plan.add_permits {
            view.add_permit(n);
        }
        for n in &plan.remove_permits {
            view.remove_permit(n);
        }
        for n in &plan.add_denies {
            view.add_deny(n);
        }
        for n in &plan.remove_denies {
            view.remove_deny(n);
        }
    }

    #[test]
    fn hides_contacts_the_mirror_does_not_have() {
        let mirror = Mirror::new();
        let mut view = VisibleList::new();
        view.upsert_contact("stale", "Friends", None);

        let plan = reconcile(&mirror, &view, "me", false);
        assert_eq!(plan.hide, vec!["stale".to_owned()]);
        assert!(plan.show.is_empty());
    }

    #[test]
    fn contact_lands_in_its_named_group() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::group(3, "Friends"));
        mirror.insert(SsiItem::contact(3, 1, "foo"));

        let plan = reconcile(&mirror, &VisibleList::new(), "me", false);
        assert_eq!(
            plan.show,
            vec![ShowContact {
                name: "foo".to_owned(),
                group: "Friends".to_owned(),
                alias: None,
            }]
        );
    }

    #[test]
    fn contact_without_group_falls_back_to_orphans() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::contact(9, 1, "lost"));

        let plan = reconcile(&mirror, &VisibleList::new(), "me", false);
        assert_eq!(plan.show[0].group, "Orphans");
    }

    #[test]
    fn stale_alias_or_group_is_refreshed() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::group(3, "Friends"));
        let mut item = SsiItem::contact(3, 1, "buddy");
        item.set_alias(Some("pal"));
        mirror.insert(item);

        let mut view = VisibleList::new();
        view.upsert_contact("buddy", "Friends", Some("old alias"));

        let plan = reconcile(&mirror, &view, "me", false);
        assert_eq!(plan.show.len(), 1);
        assert_eq!(plan.show[0].alias.as_deref(), Some("pal"));
    }

    #[test]
    fn privacy_lists_reconcile_both_directions() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::permit(1, "friend"));
        mirror.insert(SsiItem::deny(2, "pest"));

        let mut view = VisibleList::new();
        view.add_permit("gone");
        view.add_deny("pest");

        let plan = reconcile(&mirror, &view, "me", false);
        assert_eq!(plan.add_permits, vec!["friend".to_owned()]);
        assert_eq!(plan.remove_permits, vec!["gone".to_owned()]);
        assert!(plan.add_denies.is_empty());
        assert!(plan.remove_denies.is_empty());
    }

    #[test]
    fn idle_bit_follows_local_preference() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::presence(5, presence_flags::SHOW_IDLE));

        let plan = reconcile(&mirror, &VisibleList::new(), "me", false);
        assert!(!plan.idle_visible);
        assert!(plan.write_back_idle);

        let plan = reconcile(&mirror, &VisibleList::new(), "me", true);
        assert!(plan.idle_visible);
        assert!(!plan.write_back_idle);
    }

    #[test]
    fn missing_presence_item_writes_back_only_when_visible() {
        let mirror = Mirror::new();
        assert!(reconcile(&mirror, &VisibleList::new(), "me", true).write_back_idle);
        assert!(!reconcile(&mirror, &VisibleList::new(), "me", false).write_back_idle);
    }

    #[test]
    fn own_entry_comment_becomes_capability_hint() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::group(1, "Friends"));
        let mut own = SsiItem::contact(1, 2, "My Name");
        own.attrs.set(
            crate::constants::item_attr::COMMENT,
            b"wide-text".to_vec(),
        );
        mirror.insert(own);
        let mut other = SsiItem::contact(1, 3, "someone");
        other
            .attrs
            .set(crate::constants::item_attr::COMMENT, b"note".to_vec());
        mirror.insert(other);

        let plan = reconcile(&mirror, &VisibleList::new(), "myname", false);
        assert_eq!(plan.capability_hint.as_deref(), Some("wide-text"));
    }

    #[test]
    fn applying_the_plan_makes_reconcile_idempotent() {
        let mut mirror = Mirror::new();
        mirror.insert(SsiItem::group(3, "Friends"));
        let mut item = SsiItem::contact(3, 1, "buddy");
        item.set_alias(Some("pal"));
        mirror.insert(item);
        mirror.insert(SsiItem::contact(9, 2, "lost"));
        mirror.insert(SsiItem::permit(4, "friend"));
        mirror.insert(SsiItem::deny(5, "pest"));
        mirror.insert(SsiItem::presence(6, 0));

        let mut view = VisibleList::new();
        view.upsert_contact("stale", "Work", None);
        view.add_permit("gone");

        let plan = reconcile(&mirror, &view, "me", true);
        assert!(!plan.is_empty());
        apply(&plan, &mut view);

        // The session would push the merged idle bit to the server; mimic
        // the acknowledged write-back here.
        let mut updated = mirror.presence_item().unwrap().clone();
        updated.set_presence_flags(presence_flags::SHOW_IDLE);
        mirror.replace(updated);

        let again = reconcile(&mirror, &view, "me", true);
        assert!(again.is_empty(), "second pass still wants: {again:?}");
    }
}
