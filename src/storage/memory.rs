//! In-memory storage backend.
//!
//! Thread-safe implementation of [`ContactStore`] for embedded usage, tests,
//! and as a reference implementation of the store guards.

use std::sync::RwLock;

use chrono::Utc;

use crate::contact::{Contact, ContactId, NewContact};
use crate::storage::index::{ContactIndex, Demote};
use crate::storage::traits::{ContactStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory contact store.
#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    index: RwLock<ContactIndex>,
}

impl InMemoryContactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with existing records.
    ///
    /// Records are loaded as-is (timestamps included) so fixtures can pin
    /// `created_at`. Ids must be unique; new inserts continue after the
    /// highest seeded id.
    ///
    /// # Errors
    /// Returns `InvalidMutation` on a duplicate id.
    pub fn seeded(contacts: impl IntoIterator<Item = Contact>) -> Result<Self, StorageError> {
        let mut index = ContactIndex::default();
        for contact in contacts {
            if index.get(contact.id).is_some() {
                return Err(StorageError::InvalidMutation(format!(
                    "duplicate contact id in seed: {}",
                    contact.id
                )));
            }
            index.apply_insert(contact);
        }
        Ok(Self {
            index: RwLock::new(index),
        })
    }

    /// Number of stored records.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.index.read().map_err(|_| lock_err("contact.len"))?.len())
    }

    /// Returns true if the store holds no records.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl ContactStore for InMemoryContactStore {
    fn find_by_phone_number(&self, phone_number: &str) -> Result<Vec<Contact>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("contact.find_by_phone_number"))?;
        Ok(index.find_by_phone_number(phone_number))
    }

    fn find_by_email(&self, email: &str) -> Result<Vec<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.find_by_email"))?;
        Ok(index.find_by_email(email))
    }

    fn insert(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.insert"))?;
        index.check_insert(&contact)?;
        let stored = Contact::from_draft(index.next_id(), contact, Utc::now());
        index.apply_insert(stored.clone());
        Ok(stored)
    }

    fn relink_all_with_linked_id(
        &self,
        old_primary: ContactId,
        new_primary: ContactId,
    ) -> Result<usize, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.relink"))?;
        index.check_relink(old_primary, new_primary)?;
        Ok(index.apply_relink(old_primary, new_primary, Utc::now()))
    }

    fn update_to_secondary(
        &self,
        id: ContactId,
        new_primary: ContactId,
    ) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.demote"))?;
        if index.check_demote(id, new_primary)? == Demote::Apply {
            index.apply_demote(id, new_primary, Utc::now());
        }
        Ok(())
    }

    fn find_secondaries_of(&self, primary: ContactId) -> Result<Vec<Contact>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("contact.find_secondaries_of"))?;
        Ok(index.secondaries_of(primary))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.get"))?;
        Ok(index.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.list"))?;
        Ok(index.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::LinkPrecedence;

    #[test]
    fn test_insert_assigns_ids_and_timestamps() {
        let store = InMemoryContactStore::new();
        let c = store
            .insert(NewContact::primary(Some("a@x.com".into()), Some("111".into())))
            .unwrap();
        assert_eq!(c.id, ContactId::new(1));
        assert_eq!(c.created_at, c.updated_at);
        assert_eq!(store.get(c.id).unwrap(), Some(c));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_find_by_signals() {
        let store = InMemoryContactStore::new();
        let p = store
            .insert(NewContact::primary(Some("a@x.com".into()), Some("111".into())))
            .unwrap();
        let s = store
            .insert(NewContact::secondary(Some("a@x.com".into()), Some("222".into()), p.id))
            .unwrap();

        let by_email: Vec<_> = store.find_by_email("a@x.com").unwrap().iter().map(|c| c.id).collect();
        assert_eq!(by_email, vec![p.id, s.id]);

        let by_phone: Vec<_> = store
            .find_by_phone_number("222")
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(by_phone, vec![s.id]);
        assert!(store.find_by_phone_number("333").unwrap().is_empty());
    }

    #[test]
    fn test_relink_then_demote() {
        let store = InMemoryContactStore::new();
        let p1 = store.insert(NewContact::primary(Some("a@x.com".into()), None)).unwrap();
        let p2 = store.insert(NewContact::primary(None, Some("222".into()))).unwrap();
        let s2 = store
            .insert(NewContact::secondary(Some("b@x.com".into()), Some("222".into()), p2.id))
            .unwrap();

        assert_eq!(store.relink_all_with_linked_id(p2.id, p1.id).unwrap(), 1);
        store.update_to_secondary(p2.id, p1.id).unwrap();
        // Second demote is a no-op.
        store.update_to_secondary(p2.id, p1.id).unwrap();

        let demoted = store.get(p2.id).unwrap().unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_contact_id, Some(p1.id));
        assert_eq!(
            store.get(s2.id).unwrap().unwrap().linked_contact_id,
            Some(p1.id)
        );

        let ids: Vec<_> = store
            .find_secondaries_of(p1.id)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![p2.id, s2.id]);
    }

    #[test]
    fn test_seeded_store_continues_ids() {
        let now = Utc::now();
        let seed = Contact::from_draft(
            ContactId::new(41),
            NewContact::primary(Some("a@x.com".into()), None),
            now,
        );
        let store = InMemoryContactStore::seeded([seed.clone()]).unwrap();
        let next = store.insert(NewContact::primary(Some("b@x.com".into()), None)).unwrap();
        assert_eq!(next.id, ContactId::new(42));

        assert!(InMemoryContactStore::seeded([seed.clone(), seed]).is_err());
    }

    #[test]
    fn test_store_is_shareable_across_threads() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryContactStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .insert(NewContact::primary(Some(format!("{i}@x.com")), None))
                        .unwrap()
                })
            })
            .collect();

        let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}
