//! Link-structure audit and repair.
//!
//! Well-formed data has exactly one primary per identity, every secondary
//! pointing straight at it, and every signal belonging to a single identity.
//! [`audit`] reports records that break that shape. [`repair`] flattens link
//! chains and finishes merges that were cut short between relink and demote,
//! using only the regular store mutations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::{info, warn};

use crate::contact::{Contact, ContactId, LinkPrecedence};
use crate::storage::{ContactStore, StorageError};

const MAX_LINK_HOPS: usize = 128;

/// A record that breaks the link invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Secondary whose link target does not exist.
    DanglingLink {
        contact: ContactId,
        linked: ContactId,
    },
    /// Secondary whose link target is itself a secondary.
    ChainedLink {
        contact: ContactId,
        linked: ContactId,
    },
    /// Primary that carries a link.
    PrimaryWithLink {
        contact: ContactId,
    },
    /// Secondary with no link.
    SecondaryWithoutLink {
        contact: ContactId,
    },
    /// Primary whose identity shares a signal with an older identity. This is
    /// what a merge interrupted before its demote leaves behind.
    SplitIdentity {
        primary: ContactId,
        older: ContactId,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingLink { contact, linked } => {
                write!(f, "contact {contact} links to missing contact {linked}")
            }
            Self::ChainedLink { contact, linked } => {
                write!(f, "contact {contact} links to secondary {linked}")
            }
            Self::PrimaryWithLink { contact } => write!(f, "primary {contact} carries a link"),
            Self::SecondaryWithoutLink { contact } => write!(f, "secondary {contact} has no link"),
            Self::SplitIdentity { primary, older } => {
                write!(f, "primary {primary} shares a signal with older primary {older}")
            }
        }
    }
}

/// Result of an audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub contacts: usize,
    pub primaries: usize,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    /// Returns true if no violations were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Result of a repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairSummary {
    /// Records moved onto their root primary.
    pub relinked: usize,
    /// Split identities folded into their oldest primary.
    pub merged: usize,
    /// Violations the regular mutations cannot fix (dangling links, cycles,
    /// malformed precedence). These need manual attention.
    pub unresolved: Vec<Violation>,
}

fn check(contacts: &[Contact]) -> IntegrityReport {
    let by_id: HashMap<ContactId, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();
    let mut report = IntegrityReport {
        contacts: contacts.len(),
        ..IntegrityReport::default()
    };

    for c in contacts {
        match (c.link_precedence, c.linked_contact_id) {
            (LinkPrecedence::Primary, None) => report.primaries += 1,
            (LinkPrecedence::Primary, Some(_)) => {
                report.primaries += 1;
                report
                    .violations
                    .push(Violation::PrimaryWithLink { contact: c.id });
            }
            (LinkPrecedence::Secondary, None) => report
                .violations
                .push(Violation::SecondaryWithoutLink { contact: c.id }),
            (LinkPrecedence::Secondary, Some(linked)) => match by_id.get(&linked) {
                None => report.violations.push(Violation::DanglingLink {
                    contact: c.id,
                    linked,
                }),
                Some(target) if !target.is_primary() => {
                    report.violations.push(Violation::ChainedLink {
                        contact: c.id,
                        linked,
                    });
                }
                Some(_) => {}
            },
        }
    }
    report.violations.extend(
        split_identities(&by_id, contacts)
            .into_iter()
            .map(|(older, primary)| Violation::SplitIdentity { primary, older }),
    );
    report
}

fn find(parent: &mut HashMap<ContactId, ContactId>, id: ContactId) -> ContactId {
    let mut root = id;
    while let Some(&up) = parent.get(&root) {
        if up == root {
            break;
        }
        root = up;
    }
    parent.insert(id, root);
    root
}

/// Puts `root` in the same group as the first identity seen carrying `value`.
fn join<'a>(
    parent: &mut HashMap<ContactId, ContactId>,
    seen: &mut HashMap<&'a str, ContactId>,
    value: &'a str,
    root: ContactId,
) {
    let first = *seen.entry(value).or_insert(root);
    let (a, b) = (find(parent, first), find(parent, root));
    if a != b {
        parent.insert(a.max(b), a.min(b));
    }
}

/// Groups identities that share an email or phone number. Returns one
/// `(oldest primary, other primary)` pair per identity that has to be folded
/// into the oldest of its group.
fn split_identities(
    by_id: &HashMap<ContactId, &Contact>,
    contacts: &[Contact],
) -> Vec<(ContactId, ContactId)> {
    let mut by_email: HashMap<&str, ContactId> = HashMap::new();
    let mut by_phone: HashMap<&str, ContactId> = HashMap::new();
    let mut parent: HashMap<ContactId, ContactId> = HashMap::new();

    for c in contacts {
        let Some(root) = root_of(by_id, c.id) else {
            continue;
        };
        if let Some(email) = c.email.as_deref() {
            join(&mut parent, &mut by_email, email, root);
        }
        if let Some(phone_number) = c.phone_number.as_deref() {
            join(&mut parent, &mut by_phone, phone_number, root);
        }
    }

    let roots: Vec<ContactId> = parent.keys().copied().collect();
    let mut groups: BTreeMap<ContactId, Vec<&Contact>> = BTreeMap::new();
    for root in roots {
        let group = find(&mut parent, root);
        if let Some(&primary) = by_id.get(&root) {
            groups.entry(group).or_default().push(primary);
        }
    }

    let mut pairs = Vec::new();
    for members in groups.into_values().filter(|m| m.len() > 1) {
        let Some(oldest) = members.iter().min_by(|a, b| a.age_cmp(b)).map(|c| c.id) else {
            continue;
        };
        pairs.extend(
            members
                .iter()
                .map(|c| c.id)
                .filter(|id| *id != oldest)
                .map(|id| (oldest, id)),
        );
    }
    pairs.sort_unstable_by_key(|&(_, id)| id);
    pairs
}

/// Follows links from `start` to a primary. `None` on a dangling link, a
/// cycle, or a malformed record along the way.
fn root_of(by_id: &HashMap<ContactId, &Contact>, start: ContactId) -> Option<ContactId> {
    let mut current = start;
    for _ in 0..MAX_LINK_HOPS {
        let contact = by_id.get(&current)?;
        if contact.is_primary() {
            return Some(current);
        }
        current = contact.linked_contact_id?;
    }
    None
}

/// Checks every record in the store against the link invariants.
///
/// # Errors
/// Propagates store failures.
pub fn audit(store: &dyn ContactStore) -> Result<IntegrityReport, StorageError> {
    let contacts = store.list()?;
    Ok(check(&contacts))
}

/// Flattens link chains and folds split identities together.
///
/// First, for each secondary that other records link to, every dependent is
/// relinked to the root primary of the chain. Then every identity sharing a
/// signal with an older one is merged into the oldest of its group, the same
/// way a resolution merges: dependents relinked, then the primary demoted.
/// Running it on clean data is a no-op.
///
/// # Errors
/// Propagates store failures; mutations already applied stay applied.
pub fn repair(store: &dyn ContactStore) -> Result<RepairSummary, StorageError> {
    let contacts = store.list()?;
    let by_id: HashMap<ContactId, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();

    let intermediates: BTreeSet<ContactId> = check(&contacts)
        .violations
        .iter()
        .filter_map(|v| match v {
            Violation::ChainedLink { linked, .. } => Some(*linked),
            _ => None,
        })
        .collect();

    let mut relinked = 0;
    for intermediate in intermediates {
        let Some(root) = root_of(&by_id, intermediate) else {
            warn!(contact = %intermediate, "link chain has no reachable primary");
            continue;
        };
        relinked += store.relink_all_with_linked_id(intermediate, root)?;
    }

    let contacts = store.list()?;
    let by_id: HashMap<ContactId, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();
    let mut merged = 0;
    for (older, newer) in split_identities(&by_id, &contacts) {
        relinked += store.relink_all_with_linked_id(newer, older)?;
        store.update_to_secondary(newer, older)?;
        info!(primary = %older, demoted = %newer, "folded split identity");
        merged += 1;
    }

    let unresolved = audit(store)?.violations;
    info!(relinked, merged, unresolved = unresolved.len(), "repair pass finished");
    Ok(RepairSummary {
        relinked,
        merged,
        unresolved,
    })
}
