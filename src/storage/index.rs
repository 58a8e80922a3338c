//! In-memory contact index shared by the storage backends.
//!
//! Every mutation is split into a `check_*` step that enforces the store
//! guards without touching state, and an `apply_*` step that cannot fail.
//! The persistent backend logs to its WAL between the two, so a record that
//! reaches the log has already passed every guard and replay never has to
//! re-validate.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::storage::traits::StorageError;

/// Upper bound on link hops followed by guard checks.
const MAX_LINK_HOPS: usize = 128;

/// Outcome of a demote check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Demote {
    /// Already a secondary of the requested primary.
    AlreadyLinked,
    Apply,
}

#[derive(Debug, Default)]
pub(crate) struct ContactIndex {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone_number: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    last_id: u64,
}

impl ContactIndex {
    pub(crate) fn next_id(&self) -> ContactId {
        ContactId::new(self.last_id).next()
    }

    pub(crate) fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    fn collect(&self, ids: Option<&BTreeSet<ContactId>>) -> Vec<Contact> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.by_id.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    pub(crate) fn find_by_email(&self, email: &str) -> Vec<Contact> {
        self.collect(self.by_email.get(email))
    }

    pub(crate) fn find_by_phone_number(&self, phone_number: &str) -> Vec<Contact> {
        self.collect(self.by_phone_number.get(phone_number))
    }

    pub(crate) fn secondaries_of(&self, primary: ContactId) -> Vec<Contact> {
        self.collect(self.by_linked.get(&primary))
            .into_iter()
            .filter(|c| c.link_precedence == LinkPrecedence::Secondary)
            .collect()
    }

    pub(crate) fn list(&self) -> Vec<Contact> {
        self.by_id.values().cloned().collect()
    }

    /// Follows links from `id` to its primary; `None` on a dangling link or
    /// a cycle.
    fn root_of(&self, id: ContactId) -> Option<ContactId> {
        let mut current = id;
        for _ in 0..MAX_LINK_HOPS {
            let contact = self.by_id.get(&current)?;
            if contact.is_primary() {
                return Some(current);
            }
            current = contact.linked_contact_id?;
        }
        None
    }

    /// True when records of other identities carry the signal and no record
    /// of `target`'s identity does.
    fn is_foreign(&self, carriers: Option<&BTreeSet<ContactId>>, target: ContactId) -> bool {
        let mut elsewhere = false;
        for id in carriers.into_iter().flatten() {
            match self.root_of(*id) {
                Some(root) if root == target => return false,
                Some(_) => elsewhere = true,
                None => {}
            }
        }
        elsewhere
    }

    fn check_primary_target(&self, id: ContactId) -> Result<(), StorageError> {
        let target = self.by_id.get(&id).ok_or(StorageError::ContactNotFound(id))?;
        if !target.is_primary() {
            return Err(StorageError::NotPrimary(id));
        }
        Ok(())
    }

    pub(crate) fn check_insert(&self, draft: &NewContact) -> Result<(), StorageError> {
        match draft.link_precedence {
            LinkPrecedence::Primary => {
                if draft.linked_contact_id.is_some() {
                    return Err(StorageError::InvalidMutation(
                        "a primary contact cannot carry a link".to_string(),
                    ));
                }
                if draft
                    .email
                    .as_ref()
                    .is_some_and(|e| self.by_email.get(e).is_some_and(|s| !s.is_empty()))
                {
                    return Err(StorageError::SignalConflict { signal: "email" });
                }
                if draft
                    .phone_number
                    .as_ref()
                    .is_some_and(|p| self.by_phone_number.get(p).is_some_and(|s| !s.is_empty()))
                {
                    return Err(StorageError::SignalConflict {
                        signal: "phoneNumber",
                    });
                }
                Ok(())
            }
            LinkPrecedence::Secondary => {
                let target = draft.linked_contact_id.ok_or_else(|| {
                    StorageError::InvalidMutation("a secondary contact needs a link".to_string())
                })?;
                self.check_primary_target(target)?;
                // A signal that arrived on another identity since the lookup
                // means the two identities must merge instead.
                if draft
                    .email
                    .as_ref()
                    .is_some_and(|e| self.is_foreign(self.by_email.get(e), target))
                {
                    return Err(StorageError::SignalConflict { signal: "email" });
                }
                if draft
                    .phone_number
                    .as_ref()
                    .is_some_and(|p| self.is_foreign(self.by_phone_number.get(p), target))
                {
                    return Err(StorageError::SignalConflict {
                        signal: "phoneNumber",
                    });
                }
                Ok(())
            }
        }
    }

    pub(crate) fn check_relink(
        &self,
        old_primary: ContactId,
        new_primary: ContactId,
    ) -> Result<(), StorageError> {
        if old_primary == new_primary {
            return Err(StorageError::InvalidMutation(
                "cannot relink contacts onto the same primary".to_string(),
            ));
        }
        self.check_primary_target(new_primary)
    }

    pub(crate) fn check_demote(
        &self,
        id: ContactId,
        new_primary: ContactId,
    ) -> Result<Demote, StorageError> {
        if id == new_primary {
            return Err(StorageError::InvalidMutation(
                "cannot link a contact to itself".to_string(),
            ));
        }
        let contact = self.by_id.get(&id).ok_or(StorageError::ContactNotFound(id))?;
        if !contact.is_primary() && contact.linked_contact_id == Some(new_primary) {
            return Ok(Demote::AlreadyLinked);
        }
        self.check_primary_target(new_primary)?;
        if self.by_linked.get(&id).is_some_and(|s| !s.is_empty()) {
            return Err(StorageError::DependentsRemain(id));
        }
        Ok(Demote::Apply)
    }

    pub(crate) fn apply_insert(&mut self, contact: Contact) {
        let id = contact.id;
        self.last_id = self.last_id.max(id.get());
        if let Some(email) = &contact.email {
            self.by_email.entry(email.clone()).or_default().insert(id);
        }
        if let Some(phone_number) = &contact.phone_number {
            self.by_phone_number
                .entry(phone_number.clone())
                .or_default()
                .insert(id);
        }
        if let Some(linked) = contact.linked_contact_id {
            self.by_linked.entry(linked).or_default().insert(id);
        }
        self.by_id.insert(id, contact);
    }

    pub(crate) fn apply_relink(
        &mut self,
        old_primary: ContactId,
        new_primary: ContactId,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(moved) = self.by_linked.remove(&old_primary) else {
            return 0;
        };
        for id in &moved {
            if let Some(contact) = self.by_id.get_mut(id) {
                contact.linked_contact_id = Some(new_primary);
                contact.updated_at = now;
            }
        }
        let count = moved.len();
        self.by_linked.entry(new_primary).or_default().extend(moved);
        count
    }

    pub(crate) fn apply_demote(&mut self, id: ContactId, new_primary: ContactId, now: DateTime<Utc>) {
        let Some(contact) = self.by_id.get_mut(&id) else {
            return;
        };
        if let Some(previous) = contact.linked_contact_id {
            if let Some(set) = self.by_linked.get_mut(&previous) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_linked.remove(&previous);
                }
            }
        }
        contact.demote_to(new_primary, now);
        self.by_linked.entry(new_primary).or_default().insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(index: &mut ContactIndex, draft: NewContact) -> Contact {
        index.check_insert(&draft).unwrap();
        let contact = Contact::from_draft(index.next_id(), draft, Utc::now());
        index.apply_insert(contact.clone());
        contact
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut index = ContactIndex::default();
        let a = insert(&mut index, NewContact::primary(Some("a@x.com".into()), None));
        let b = insert(&mut index, NewContact::primary(Some("b@x.com".into()), None));
        assert_eq!(a.id, ContactId::new(1));
        assert_eq!(b.id, ContactId::new(2));
        assert_eq!(index.next_id(), ContactId::new(3));
    }

    #[test]
    fn test_primary_insert_rejects_known_signal() {
        let mut index = ContactIndex::default();
        insert(&mut index, NewContact::primary(Some("a@x.com".into()), Some("111".into())));

        let err = index
            .check_insert(&NewContact::primary(None, Some("111".into())))
            .unwrap_err();
        assert_eq!(err, StorageError::SignalConflict { signal: "phoneNumber" });
    }

    #[test]
    fn test_secondary_insert_requires_primary_target() {
        let mut index = ContactIndex::default();
        let p = insert(&mut index, NewContact::primary(Some("a@x.com".into()), None));
        let s = insert(
            &mut index,
            NewContact::secondary(Some("a@x.com".into()), Some("222".into()), p.id),
        );

        let err = index
            .check_insert(&NewContact::secondary(None, Some("333".into()), s.id))
            .unwrap_err();
        assert_eq!(err, StorageError::NotPrimary(s.id));

        let missing = ContactId::new(99);
        let err = index
            .check_insert(&NewContact::secondary(None, Some("333".into()), missing))
            .unwrap_err();
        assert_eq!(err, StorageError::ContactNotFound(missing));
    }

    #[test]
    fn test_secondary_insert_rejects_signal_of_other_identity() {
        let mut index = ContactIndex::default();
        let a = insert(&mut index, NewContact::primary(Some("a@x.com".into()), None));
        let b = insert(&mut index, NewContact::primary(Some("b@x.com".into()), None));
        // Phone 333 lands on identity a after both callers looked it up.
        insert(
            &mut index,
            NewContact::secondary(Some("a@x.com".into()), Some("333".into()), a.id),
        );

        let err = index
            .check_insert(&NewContact::secondary(
                Some("b@x.com".into()),
                Some("333".into()),
                b.id,
            ))
            .unwrap_err();
        assert_eq!(err, StorageError::SignalConflict { signal: "phoneNumber" });

        // Known inside the target identity as well: no conflict.
        index
            .check_insert(&NewContact::secondary(
                Some("a@x.com".into()),
                Some("333".into()),
                a.id,
            ))
            .unwrap();
    }

    #[test]
    fn test_deterministic_rejections_are_invalid_mutations() {
        let mut index = ContactIndex::default();
        let p = insert(&mut index, NewContact::primary(Some("a@x.com".into()), None));

        assert!(matches!(
            index.check_relink(p.id, p.id),
            Err(StorageError::InvalidMutation(_))
        ));
        assert!(matches!(
            index.check_demote(p.id, p.id),
            Err(StorageError::InvalidMutation(_))
        ));
    }

    #[test]
    fn test_demote_requires_no_dependents_and_is_idempotent() {
        let mut index = ContactIndex::default();
        let p1 = insert(&mut index, NewContact::primary(Some("a@x.com".into()), None));
        let p2 = insert(&mut index, NewContact::primary(None, Some("222".into())));
        let s2 = insert(
            &mut index,
            NewContact::secondary(Some("c@x.com".into()), Some("222".into()), p2.id),
        );

        assert_eq!(
            index.check_demote(p2.id, p1.id).unwrap_err(),
            StorageError::DependentsRemain(p2.id)
        );

        index.check_relink(p2.id, p1.id).unwrap();
        assert_eq!(index.apply_relink(p2.id, p1.id, Utc::now()), 1);
        assert_eq!(index.get(s2.id).unwrap().linked_contact_id, Some(p1.id));

        assert_eq!(index.check_demote(p2.id, p1.id).unwrap(), Demote::Apply);
        index.apply_demote(p2.id, p1.id, Utc::now());
        assert_eq!(index.check_demote(p2.id, p1.id).unwrap(), Demote::AlreadyLinked);

        let ids: Vec<_> = index.secondaries_of(p1.id).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![p2.id, s2.id]);
        assert!(index.secondaries_of(p2.id).is_empty());
    }

    #[test]
    fn test_lookups_are_in_id_order() {
        let mut index = ContactIndex::default();
        let p = insert(&mut index, NewContact::primary(Some("a@x.com".into()), Some("1".into())));
        let s1 = insert(&mut index, NewContact::secondary(Some("a@x.com".into()), Some("2".into()), p.id));
        let s2 = insert(&mut index, NewContact::secondary(Some("a@x.com".into()), Some("3".into()), p.id));

        let ids: Vec<_> = index.find_by_email("a@x.com").iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![p.id, s1.id, s2.id]);
        assert!(index.find_by_email("A@X.COM").is_empty());
        assert_eq!(index.len(), 3);
    }
}
