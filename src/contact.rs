//! Contact records and link precedence.
//!
//! A contact is the only persisted entity. Records are append-only: once
//! inserted, only `link_precedence`, `linked_contact_id` and `updated_at`
//! ever change, and only when the record's identity is merged into an older
//! one.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned contact identifier.
///
/// Ids are assigned monotonically by the store, so a lower id always belongs
/// to a record inserted earlier. This makes the id a valid tie-break when two
/// records carry the same `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContactId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<ContactId> for u64 {
    fn from(id: ContactId) -> Self {
        id.0
    }
}

/// Whether a record is the canonical record of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    /// The identity's canonical record. Has no outgoing link.
    Primary,
    /// A record subsumed into an identity. Links directly at the primary.
    Secondary,
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A persisted contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone_number: Option<String>,

    /// Present only on secondaries; always names the identity's primary.
    #[serde(default)]
    pub linked_contact_id: Option<ContactId>,

    pub link_precedence: LinkPrecedence,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Materializes a draft into a stored record.
    ///
    /// Only stores call this; they own id assignment and the clock.
    #[must_use]
    pub fn from_draft(id: ContactId, draft: NewContact, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: draft.email,
            phone_number: draft.phone_number,
            linked_contact_id: draft.linked_contact_id,
            link_precedence: draft.link_precedence,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if this record is its identity's primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Orders two records by age: earlier `created_at` first, lower id on a tie.
    #[must_use]
    pub fn age_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Returns true if this record is strictly older than `other`.
    #[must_use]
    pub fn is_older_than(&self, other: &Self) -> bool {
        self.age_cmp(other) == Ordering::Less
    }

    /// Points this record at `primary` and marks it secondary.
    pub(crate) fn demote_to(&mut self, primary: ContactId, now: DateTime<Utc>) {
        self.link_precedence = LinkPrecedence::Secondary;
        self.linked_contact_id = Some(primary);
        self.updated_at = now;
    }
}

/// A contact that has not been stored yet.
///
/// Built by the resolver and handed to [`crate::storage::ContactStore::insert`],
/// which assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_contact_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// Draft for a brand-new identity.
    #[must_use]
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_contact_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// Draft for a record joining the identity whose primary is `primary`.
    #[must_use]
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_contact_id: Some(primary),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stored(id: u64, draft: NewContact, at: DateTime<Utc>) -> Contact {
        Contact::from_draft(ContactId::new(id), draft, at)
    }

    #[test]
    fn test_primary_resolves_to_itself() {
        let c = stored(1, NewContact::primary(Some("a@x.com".into()), None), Utc::now());
        assert!(c.is_primary());
        assert!(c.linked_contact_id.is_none());
    }

    #[test]
    fn test_secondary_resolves_to_linked_primary() {
        let draft = NewContact::secondary(None, Some("222".into()), ContactId::new(1));
        let c = stored(2, draft, Utc::now());
        assert!(!c.is_primary());
        assert_eq!(c.linked_contact_id, Some(ContactId::new(1)));
    }

    #[test]
    fn test_age_uses_created_at_then_id() {
        let t0 = Utc::now();
        let older = stored(5, NewContact::primary(None, Some("1".into())), t0);
        let newer = stored(3, NewContact::primary(None, Some("2".into())), t0 + Duration::seconds(1));
        assert!(older.is_older_than(&newer));
        assert!(!newer.is_older_than(&older));

        let tie_low = stored(3, NewContact::primary(None, Some("1".into())), t0);
        let tie_high = stored(4, NewContact::primary(None, Some("2".into())), t0);
        assert!(tie_low.is_older_than(&tie_high));
    }

    #[test]
    fn test_demote_sets_link_and_precedence() {
        let t0 = Utc::now();
        let mut c = stored(2, NewContact::primary(Some("b@x.com".into()), None), t0);
        c.demote_to(ContactId::new(1), t0 + Duration::seconds(5));
        assert_eq!(c.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(c.linked_contact_id, Some(ContactId::new(1)));
        assert_eq!(c.created_at, t0);
        assert!(c.updated_at > t0);
    }

    #[test]
    fn test_contact_serializes_camel_case() {
        let c = stored(1, NewContact::primary(Some("a@x.com".into()), Some("111".into())), Utc::now());
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["phoneNumber"], "111");
        assert_eq!(json["linkPrecedence"], "primary");
        assert!(json["linkedContactId"].is_null());
    }
}
