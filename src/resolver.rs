//! Identity resolution.
//!
//! [`IdentityResolver`] turns a pair of signals into the consolidated
//! identity they belong to, writing at most one phase of mutations:
//!
//! ```text
//! START ─┬─ single-signal lookup ─┬─ no match ──────────── CREATE primary
//!        │                        └─ match ─────────────── EXISTING (no write)
//!        └─ dual-signal lookup ───┬─ neither matches ───── CREATE primary
//!                                 ├─ one side matches ──── LINK new secondary
//!                                 └─ both match ─┬─ same identity ─ EXISTING
//!                                                └─ two identities ─ MERGE
//!                                                   (relink, then demote newer)
//! ```
//!
//! Every branch ends by reading the surviving primary's identity view.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::contact::{Contact, ContactId, NewContact};
use crate::error::{IdentityError, IdentityResult};
use crate::signal::{IdentifyRequest, Signals};
use crate::storage::{ContactStore, StorageError};
use crate::view::{IdentifyResponse, IdentityView};

/// Upper bound on link hops followed when resolving a record to its primary.
/// Well-formed data needs at most one.
const MAX_LINK_HOPS: usize = 128;

/// Resolver tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// How many times a resolution is re-run from the lookup phase after the
    /// store reports contention (a concurrent writer created or merged one
    /// of the identities this call was deciding on).
    pub conflict_retries: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
        }
    }
}

impl ResolverConfig {
    #[must_use]
    pub const fn with_conflict_retries(mut self, conflict_retries: u32) -> Self {
        self.conflict_retries = conflict_retries;
        self
    }
}

/// What a resolution call did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// No signal matched; a new primary was inserted.
    Created,
    /// Everything was already known; nothing was written.
    Existing,
    /// One signal matched; a new secondary carrying both was inserted.
    LinkedSecondary {
        secondary: ContactId,
    },
    /// The signals bridged two identities; the newer primary was demoted.
    Merged {
        demoted: ContactId,
        relinked: usize,
    },
}

/// The identity view plus what was done to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub view: IdentityView,
    pub outcome: ResolutionOutcome,
}

/// Resolves signals to identities against a [`ContactStore`].
///
/// The resolver holds no state of its own; it is cheap to share and safe to
/// call from many threads at once.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    config: ResolverConfig,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Creates a resolver with the default config.
    #[must_use]
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self::with_config(store, ResolverConfig::default())
    }

    #[must_use]
    pub fn with_config(store: Arc<dyn ContactStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves an optional email and phone number to their identity.
    ///
    /// # Errors
    /// - `InvalidRequest` if both signals are absent (or fail validation)
    /// - `StoreUnavailable` if any store operation fails
    pub fn resolve(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> IdentityResult<IdentityView> {
        let signals = Signals::new(email.map(str::to_owned), phone_number.map(str::to_owned))?;
        Ok(self.resolve_signals(&signals)?.view)
    }

    /// Parses an untyped request and resolves it into the response envelope.
    ///
    /// # Errors
    /// Same as [`IdentityResolver::resolve`].
    pub fn identify(&self, request: IdentifyRequest) -> IdentityResult<IdentifyResponse> {
        let signals = Signals::try_from(request)?;
        Ok(self.resolve_signals(&signals)?.view.into())
    }

    /// Resolves validated signals, reporting what was written.
    ///
    /// Store contention re-runs the decision from the lookup phase up to
    /// `conflict_retries` times; any other failure is returned immediately.
    ///
    /// # Errors
    /// `StoreUnavailable` if a store operation fails or contention persists.
    pub fn resolve_signals(&self, signals: &Signals) -> IdentityResult<Resolution> {
        let span = info_span!("resolve", signals = signals.kind());
        let _enter = span.enter();

        let mut retries = 0;
        loop {
            match self.attempt(signals) {
                Err(IdentityError::StoreUnavailable(e))
                    if e.is_contention() && retries < self.config.conflict_retries =>
                {
                    retries += 1;
                    warn!(error = %e, retries, "store contention; re-resolving");
                }
                result => return result,
            }
        }
    }

    /// Builds the view of the identity whose primary is `primary`.
    ///
    /// # Errors
    /// `StoreUnavailable` if the secondaries cannot be fetched.
    pub fn fetch_identity_view(&self, primary: &Contact) -> IdentityResult<IdentityView> {
        let secondaries = self.store.find_secondaries_of(primary.id)?;
        Ok(IdentityView::from_identity(primary, &secondaries))
    }

    fn attempt(&self, signals: &Signals) -> IdentityResult<Resolution> {
        match signals {
            Signals::Email(email) => {
                let matches = self.store.find_by_email(email)?;
                self.resolve_single(matches, signals)
            }
            Signals::PhoneNumber(phone_number) => {
                let matches = self.store.find_by_phone_number(phone_number)?;
                self.resolve_single(matches, signals)
            }
            Signals::Both {
                email,
                phone_number,
            } => {
                let by_email = self.store.find_by_email(email)?;
                let by_phone = self.store.find_by_phone_number(phone_number)?;
                self.resolve_both(by_email, by_phone, signals)
            }
        }
    }

    fn resolve_single(
        &self,
        matches: Vec<Contact>,
        signals: &Signals,
    ) -> IdentityResult<Resolution> {
        let Some(first) = matches.into_iter().next() else {
            return self.create_primary(signals);
        };
        let primary = self.primary_of(first)?;
        debug!(primary = %primary.id, "single signal already known");
        self.existing(&primary)
    }

    fn resolve_both(
        &self,
        by_email: Vec<Contact>,
        by_phone: Vec<Contact>,
        signals: &Signals,
    ) -> IdentityResult<Resolution> {
        let mut by_email = by_email.into_iter();
        let mut by_phone = by_phone.into_iter();
        match (by_email.next(), by_phone.next()) {
            (None, None) => self.create_primary(signals),
            (Some(known), None) | (None, Some(known)) => self.link_secondary(known, signals),
            (Some(email_match), Some(phone_match)) => {
                let for_email = self.primary_of(email_match)?;
                let for_phone = self.primary_of(phone_match)?;
                if for_email.id == for_phone.id {
                    debug!(primary = %for_email.id, "both signals already on one identity");
                    return self.existing(&for_email);
                }
                self.merge(for_email, for_phone)
            }
        }
    }

    fn existing(&self, primary: &Contact) -> IdentityResult<Resolution> {
        Ok(Resolution {
            view: self.fetch_identity_view(primary)?,
            outcome: ResolutionOutcome::Existing,
        })
    }

    fn create_primary(&self, signals: &Signals) -> IdentityResult<Resolution> {
        let draft = NewContact::primary(
            signals.email().map(str::to_owned),
            signals.phone_number().map(str::to_owned),
        );
        let created = self.store.insert(draft)?;
        info!(primary = %created.id, "created new identity");
        Ok(Resolution {
            view: IdentityView::singleton(&created),
            outcome: ResolutionOutcome::Created,
        })
    }

    fn link_secondary(&self, known: Contact, signals: &Signals) -> IdentityResult<Resolution> {
        let primary = self.primary_of(known)?;
        let draft = NewContact::secondary(
            signals.email().map(str::to_owned),
            signals.phone_number().map(str::to_owned),
            primary.id,
        );
        let secondary = self.store.insert(draft)?;
        info!(primary = %primary.id, secondary = %secondary.id, "linked new secondary");
        Ok(Resolution {
            view: self.fetch_identity_view(&primary)?,
            outcome: ResolutionOutcome::LinkedSecondary {
                secondary: secondary.id,
            },
        })
    }

    /// Folds the newer of two identities into the older one.
    ///
    /// Dependents are relinked before the newer primary is demoted. If the
    /// demote fails, the store is left with every dependent already on the
    /// surviving primary and only the newer primary's own flag stale; a
    /// retry of the same call finishes the job.
    fn merge(&self, a: Contact, b: Contact) -> IdentityResult<Resolution> {
        let (older, newer) = if a.is_older_than(&b) { (a, b) } else { (b, a) };

        let relinked = self.store.relink_all_with_linked_id(newer.id, older.id)?;
        self.store.update_to_secondary(newer.id, older.id)?;
        info!(
            primary = %older.id,
            demoted = %newer.id,
            relinked,
            "merged identities"
        );

        Ok(Resolution {
            view: self.fetch_identity_view(&older)?,
            outcome: ResolutionOutcome::Merged {
                demoted: newer.id,
                relinked,
            },
        })
    }

    /// Follows `linked_contact_id` until a primary is reached.
    fn primary_of(&self, contact: Contact) -> IdentityResult<Contact> {
        let mut current = contact;
        for hop in 0..MAX_LINK_HOPS {
            if current.is_primary() {
                return Ok(current);
            }
            let linked = current.linked_contact_id.ok_or_else(|| {
                IdentityError::internal(format!("secondary contact {} has no link", current.id))
            })?;
            if hop > 0 {
                warn!(contact = %current.id, "secondary links to another secondary");
            }
            current = self
                .store
                .get(linked)?
                .ok_or(StorageError::ContactNotFound(linked))?;
        }
        Err(IdentityError::internal(format!(
            "link chain from contact {} exceeded {MAX_LINK_HOPS} hops",
            current.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::LinkPrecedence;
    use crate::storage::InMemoryContactStore;

    fn resolver() -> (Arc<InMemoryContactStore>, IdentityResolver) {
        let store = Arc::new(InMemoryContactStore::new());
        let resolver = IdentityResolver::new(store.clone());
        (store, resolver)
    }

    fn signals(email: Option<&str>, phone: Option<&str>) -> Signals {
        Signals::new(email.map(str::to_owned), phone.map(str::to_owned)).unwrap()
    }

    #[test]
    fn test_missing_signals_is_invalid_request() {
        let (store, resolver) = resolver();
        let err = resolver.resolve(None, None).unwrap_err();
        assert!(err.is_invalid_request());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_single_signal_creates_then_reuses() {
        let (store, resolver) = resolver();
        let first = resolver.resolve_signals(&signals(None, Some("111"))).unwrap();
        assert_eq!(first.outcome, ResolutionOutcome::Created);

        let again = resolver.resolve_signals(&signals(None, Some("111"))).unwrap();
        assert_eq!(again.outcome, ResolutionOutcome::Existing);
        assert_eq!(again.view, first.view);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_single_signal_match_on_secondary_returns_its_primary() {
        let (_store, resolver) = resolver();
        let p = resolver.resolve(Some("a@x.com"), Some("111")).unwrap();
        resolver.resolve(Some("b@x.com"), Some("111")).unwrap();

        let view = resolver.resolve(Some("b@x.com"), None).unwrap();
        assert_eq!(view.primary_contact_id, p.primary_contact_id);
        assert_eq!(view.emails, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_dual_signal_links_secondary_to_primary_not_to_match() {
        let (store, resolver) = resolver();
        let p = resolver.resolve(Some("a@x.com"), Some("111")).unwrap();
        let s = resolver.resolve_signals(&signals(Some("b@x.com"), Some("111"))).unwrap();
        let ResolutionOutcome::LinkedSecondary { secondary } = s.outcome else {
            panic!("expected a linked secondary, got {:?}", s.outcome);
        };

        // Matches only the secondary's email.
        let t = resolver.resolve_signals(&signals(Some("b@x.com"), Some("333"))).unwrap();
        let ResolutionOutcome::LinkedSecondary { secondary: third } = t.outcome else {
            panic!("expected a linked secondary, got {:?}", t.outcome);
        };

        let third = store.get(third).unwrap().unwrap();
        assert_eq!(third.linked_contact_id, Some(p.primary_contact_id));
        assert_eq!(t.view.secondary_contact_ids, vec![secondary, third.id]);
        assert_eq!(t.view.phone_numbers, vec!["111", "333"]);
    }

    #[test]
    fn test_merge_demotes_newer_primary() {
        let (store, resolver) = resolver();
        let older = resolver.resolve(Some("a@x.com"), None).unwrap();
        let newer = resolver.resolve(None, Some("222")).unwrap();

        let merged = resolver.resolve_signals(&signals(Some("a@x.com"), Some("222"))).unwrap();
        assert_eq!(
            merged.outcome,
            ResolutionOutcome::Merged {
                demoted: newer.primary_contact_id,
                relinked: 0
            }
        );
        assert_eq!(merged.view.primary_contact_id, older.primary_contact_id);
        assert_eq!(merged.view.emails, vec!["a@x.com"]);
        assert_eq!(merged.view.phone_numbers, vec!["222"]);
        assert_eq!(merged.view.secondary_contact_ids, vec![newer.primary_contact_id]);

        let demoted = store.get(newer.primary_contact_id).unwrap().unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
    }

    #[test]
    fn test_merge_direction_ignores_argument_order() {
        let (_store, resolver) = resolver();
        let older = resolver.resolve(None, Some("111")).unwrap();
        resolver.resolve(Some("b@x.com"), None).unwrap();

        // Email side resolves to the newer identity here.
        let merged = resolver.resolve(Some("b@x.com"), Some("111")).unwrap();
        assert_eq!(merged.primary_contact_id, older.primary_contact_id);
    }

    #[test]
    fn test_identify_wraps_view() {
        let (_store, resolver) = resolver();
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email":"doc@hillvalley.edu","phoneNumber":88}"#).unwrap();
        let resp = resolver.identify(req).unwrap();
        assert_eq!(resp.contact.emails, vec!["doc@hillvalley.edu"]);
        assert_eq!(resp.contact.phone_numbers, vec!["88"]);
    }
}
