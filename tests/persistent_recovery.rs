//! Persistent store recovery: identities survive reopen and torn WAL tails.

#![cfg(feature = "persistent")]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use contactlink::integrity;
use contactlink::storage::persistent::WAL_FILE_NAME;
use contactlink::storage::{open_store, PersistentConfig, PersistentContactStore};
use contactlink::{ContactStore, IdentityResolver, LinkPrecedence, StorageError};

fn open(dir: &Path) -> (Arc<PersistentContactStore>, IdentityResolver) {
    let store = Arc::new(open_store(dir, Some(PersistentConfig::unsynced())).unwrap());
    let resolver = IdentityResolver::new(store.clone());
    (store, resolver)
}

#[test]
fn merged_identity_survives_reopen() {
    let dir = tempdir().unwrap();

    let (before, expected) = {
        let (store, resolver) = open(dir.path());
        resolver.resolve(Some("george@hillvalley.edu"), Some("919191")).unwrap();
        resolver.resolve(Some("biffsucks@hillvalley.edu"), Some("717171")).unwrap();
        resolver.resolve(Some("doc@hillvalley.edu"), Some("717171")).unwrap();
        let view = resolver
            .resolve(Some("george@hillvalley.edu"), Some("717171"))
            .unwrap();
        (store.list().unwrap(), view)
    };

    let (store, resolver) = open(dir.path());
    // Replay reproduces timestamps too, not just links.
    assert_eq!(store.list().unwrap(), before);

    let view = resolver.resolve(Some("doc@hillvalley.edu"), None).unwrap();
    assert_eq!(view, expected);
    assert!(integrity::audit(store.as_ref()).unwrap().is_clean());

    // Ids keep counting from where the log left off.
    let fresh = resolver.resolve(Some("marty@hillvalley.edu"), None).unwrap();
    assert_eq!(fresh.primary_contact_id.get(), 4);
}

#[test]
fn torn_wal_tail_loses_only_the_partial_record() {
    let dir = tempdir().unwrap();

    let primary = {
        let (_store, resolver) = open(dir.path());
        let first = resolver.resolve(Some("a@x.com"), Some("111")).unwrap();
        resolver.resolve(Some("b@x.com"), Some("111")).unwrap();
        first.primary_contact_id
    };

    // Simulate a crash mid-append: a length prefix with no body.
    {
        let mut wal = OpenOptions::new()
            .append(true)
            .open(dir.path().join(WAL_FILE_NAME))
            .unwrap();
        wal.write_all(&[1, 0xff, 0x00, 0x00, 0x00, b'{']).unwrap();
    }

    {
        let (store, resolver) = open(dir.path());
        assert_eq!(store.list().unwrap().len(), 2);

        // Appends after the truncation must be readable on the next open.
        resolver.resolve(Some("c@x.com"), Some("111")).unwrap();
    }

    let (store, resolver) = open(dir.path());
    let contacts = store.list().unwrap();
    assert_eq!(contacts.len(), 3);
    assert!(contacts
        .iter()
        .filter(|c| c.id != primary)
        .all(|c| c.link_precedence == LinkPrecedence::Secondary
            && c.linked_contact_id == Some(primary)));

    let view = resolver.resolve(None, Some("111")).unwrap();
    assert_eq!(view.emails, vec!["a@x.com", "b@x.com", "c@x.com"]);
}

#[test]
fn store_directory_is_exclusive() {
    let dir = tempdir().unwrap();
    let (_store, _resolver) = open(dir.path());

    let err = open_store(dir.path(), None).unwrap_err();
    assert!(matches!(err, StorageError::ConnectionError(_)));
}
