//! Contact storage.
//!
//! [`ContactStore`] is the capability boundary the resolver works against.
//! Two backends ship with the crate:
//! - [`InMemoryContactStore`] for embedded use and tests
//! - `persistent::PersistentContactStore` (feature `persistent`), a
//!   WAL-backed durable store

mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryContactStore;
pub use traits::{ContactStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_store, PersistentConfig, PersistentContactStore};
