//! Abstract storage trait for contact records.
//!
//! The resolver only ever talks to a [`ContactStore`]. Any backend
//! (relational, document, in-memory) works as long as every operation is
//! linearizable: a read issued after a write within one resolution call must
//! observe that write.

use thiserror::Error;

use crate::contact::{Contact, ContactId, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// An insert collided with an existing record carrying the same signal.
    /// Another caller recorded it first, possibly on another identity.
    #[error("Signal already recorded: {signal}")]
    SignalConflict {
        /// Which signal collided (`email` or `phoneNumber`).
        signal: &'static str,
    },

    /// A link target is not (or is no longer) a primary.
    #[error("Contact {0} is not a primary")]
    NotPrimary(ContactId),

    /// A record cannot be demoted while other records still link to it.
    #[error("Contact {0} still has linked secondaries")]
    DependentsRemain(ContactId),

    /// A mutation that can never succeed as issued (self-links, a primary
    /// carrying a link). Retrying it changes nothing.
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl StorageError {
    /// Returns true if the error means a concurrent writer changed the
    /// records this call was deciding on. Re-running the decision from the
    /// lookup phase resolves it.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::SignalConflict { .. } | Self::NotPrimary(_) | Self::DependentsRemain(_)
        )
    }
}

/// Storage trait for contact records.
///
/// All lookups return records in ascending id order, i.e. insertion order.
/// "First match" therefore always means "oldest matching record".
///
/// # Guards
/// Implementations must enforce, atomically with the mutation:
/// - a primary insert is rejected with `SignalConflict` if any record already
///   carries its email or phone number
/// - a secondary insert, relink or demote is rejected with `NotPrimary` if
///   the link target is not currently a primary
/// - a secondary insert is rejected with `SignalConflict` if one of its
///   signals is carried by another identity and by no record of the target's
/// - a demote is rejected with `DependentsRemain` while records still link to
///   the record being demoted
pub trait ContactStore: Send + Sync {
    /// All records carrying exactly this phone number, any precedence.
    fn find_by_phone_number(&self, phone_number: &str) -> Result<Vec<Contact>, StorageError>;

    /// All records carrying exactly this email, any precedence.
    fn find_by_email(&self, email: &str) -> Result<Vec<Contact>, StorageError>;

    /// Store a new record, assigning `id`, `created_at` and `updated_at`.
    fn insert(&self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Point every record currently linked to `old_primary` at `new_primary`.
    ///
    /// Returns how many records were relinked.
    fn relink_all_with_linked_id(
        &self,
        old_primary: ContactId,
        new_primary: ContactId,
    ) -> Result<usize, StorageError>;

    /// Mark `id` secondary, linked to `new_primary`.
    ///
    /// Idempotent: demoting a record that is already a secondary of
    /// `new_primary` succeeds without change.
    fn update_to_secondary(&self, id: ContactId, new_primary: ContactId)
        -> Result<(), StorageError>;

    /// All secondaries linked to `primary`.
    fn find_secondaries_of(&self, primary: ContactId) -> Result<Vec<Contact>, StorageError>;

    /// Get a record by id.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Every record in the store. Used by audits and repair passes.
    fn list(&self) -> Result<Vec<Contact>, StorageError>;
}
