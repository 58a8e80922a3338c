//! # contactlink - contact identity reconciliation
//!
//! contactlink resolves an incoming email address and/or phone number to the
//! single identity those signals belong to: a primary contact record plus
//! every secondary record linked to it. New signals are recorded as new
//! contacts; when a request bridges two previously separate identities, the
//! newer one is merged into the older one.
//!
//! ## Core Concepts
//!
//! - **Contact**: an append-only record carrying an email and/or phone number
//! - **Identity**: one primary contact and the secondaries linked to it
//! - **Signal**: an email or phone number, matched by exact equality
//! - **IdentityView**: the consolidated answer returned to callers
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use contactlink::{IdentityResolver, InMemoryContactStore};
//!
//! let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
//!
//! let first = resolver.resolve(Some("lorraine@hillvalley.edu"), Some("123456"))?;
//! let linked = resolver.resolve(Some("mcfly@hillvalley.edu"), Some("123456"))?;
//!
//! assert_eq!(linked.primary_contact_id, first.primary_contact_id);
//! assert_eq!(linked.emails, vec!["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"]);
//! # Ok::<(), contactlink::IdentityError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod contact;
pub mod error;
pub mod integrity;
pub mod resolver;
pub mod signal;
pub mod storage;
pub mod view;

#[cfg(feature = "transport-grpc")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use contact::{Contact, ContactId, LinkPrecedence, NewContact};
pub use error::{IdentityError, IdentityResult, ValidationError};
pub use resolver::{IdentityResolver, Resolution, ResolutionOutcome, ResolverConfig};
pub use signal::{IdentifyRequest, PhoneInput, Signals};
pub use storage::{ContactStore, InMemoryContactStore, StorageError};
pub use view::{IdentifyResponse, IdentityView};
