use idlink_core::{
    ContactRepository, ContactStore, IdentityResolver, ResolveError, ResolverOptions,
    StoreOptions,
};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;

fn file_store(path: &Path, busy_timeout: Duration) -> ContactStore {
    ContactStore::open_file(
        path,
        StoreOptions {
            busy_timeout,
            ..StoreOptions::default()
        },
    )
    .unwrap()
}

fn lock_writer(path: &Path) -> Connection {
    let blocker = Connection::open(path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    blocker
}

/// Every secondary links straight to a primary, and no identifier value is
/// shared by two clusters.
fn assert_cluster_invariants(store: &ContactStore) {
    let contacts = store
        .with_snapshot(|repo| {
            let total = i64::try_from(repo.count_contacts()?).unwrap_or(i64::MAX);
            let mut all = Vec::new();
            for id in 1..=total {
                if let Some(contact) = repo.get_contact(id)? {
                    all.push(contact);
                }
            }
            Ok(all)
        })
        .unwrap();

    let by_id: HashMap<i64, bool> = contacts.iter().map(|c| (c.id, c.is_primary())).collect();
    let mut owner_of: HashMap<String, i64> = HashMap::new();
    for contact in &contacts {
        let primary_id = contact.primary_id();
        assert_eq!(
            by_id.get(&primary_id),
            Some(&true),
            "contact {} links to non-primary {primary_id}",
            contact.id
        );
        let identifiers = [
            contact.email.as_ref().map(|e| format!("email:{e}")),
            contact.phone_number.as_ref().map(|p| format!("phone:{p}")),
        ];
        for key in identifiers.into_iter().flatten() {
            let owner = *owner_of.entry(key.clone()).or_insert(primary_id);
            assert_eq!(owner, primary_id, "{key} is split across clusters");
        }
    }
}

#[test]
fn concurrent_identical_submissions_create_one_primary() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir.path().join("contacts.db"), Duration::from_secs(5));

    let responses = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    IdentityResolver::new(&store, ResolverOptions::default())
                        .resolve(Some("biff@hillvalley.edu"), Some("555-0100"))
                        .unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(store.with_snapshot(|repo| repo.count_contacts()).unwrap(), 1);
    let primaries: BTreeSet<i64> = responses
        .iter()
        .map(|response| response.contact.primary_contact_id)
        .collect();
    assert_eq!(primaries.len(), 1);
    assert!(responses
        .iter()
        .all(|response| response.contact.secondary_contact_ids.is_empty()));
}

#[test]
fn concurrent_overlapping_submissions_keep_invariants() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir.path().join("contacts.db"), Duration::from_secs(5));
    let fragments = [
        (Some("a@x.io"), None),
        (None, Some("100")),
        (Some("b@x.io"), Some("200")),
        (Some("a@x.io"), Some("200")),
        (Some("c@x.io"), Some("100")),
        (Some("b@x.io"), Some("300")),
        (Some("c@x.io"), Some("300")),
        (Some("a@x.io"), Some("100")),
    ];

    thread::scope(|scope| {
        for (email, phone) in fragments {
            let store = &store;
            scope.spawn(move || {
                IdentityResolver::new(store, ResolverOptions::default())
                    .resolve(email, phone)
                    .unwrap();
            });
        }
    });

    assert_cluster_invariants(&store);

    // Every fragment above is connected, so one primary must remain.
    let resolver = IdentityResolver::new(&store, ResolverOptions::default());
    let view = resolver.resolve(Some("a@x.io"), None).unwrap().contact;
    assert_eq!(view.emails.len(), 3);
    assert_eq!(view.phone_numbers.len(), 3);
}

#[test]
fn lock_conflict_surfaces_as_transient_failure_without_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.db");
    let store = file_store(&path, Duration::ZERO);
    let resolver = IdentityResolver::new(
        &store,
        ResolverOptions {
            max_attempts: 1,
            ..ResolverOptions::default()
        },
    );

    let blocker = lock_writer(&path);
    let err = resolver.resolve(Some("a@x.io"), None).unwrap_err();
    assert!(matches!(err, ResolveError::TransientStoreFailure(_)));
    assert!(err.is_retryable());

    blocker.execute_batch("COMMIT;").unwrap();
    assert_eq!(store.with_snapshot(|repo| repo.count_contacts()).unwrap(), 0);

    let response = resolver.resolve(Some("a@x.io"), None).unwrap();
    assert_eq!(response.contact.emails, vec!["a@x.io"]);
}

#[test]
fn resolver_retries_until_the_lock_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.db");
    let store = file_store(&path, Duration::ZERO);
    let resolver = IdentityResolver::new(
        &store,
        ResolverOptions {
            max_attempts: 20,
            retry_backoff: Duration::from_millis(10),
        },
    );

    let blocker = lock_writer(&path);
    let response = thread::scope(|scope| {
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(50));
            blocker.execute_batch("COMMIT;").unwrap();
        });
        resolver.resolve(None, Some("555")).unwrap()
    });

    assert_eq!(response.contact.phone_numbers, vec!["555"]);
}

#[test]
fn unreachable_store_is_reported_as_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let open_error = ContactStore::open_file(
        dir.path().join("missing").join("contacts.db"),
        StoreOptions::default(),
    )
    .err()
    .unwrap();

    let err = ResolveError::from(open_error);
    assert!(matches!(err, ResolveError::StoreUnavailable(_)));
    assert!(!err.is_retryable());
}
