use idlink_core::db::open_db_in_memory;
use idlink_core::{
    ContactRepository, ContactStore, LinkPrecedence, NewContact, RepoError,
    SqliteContactRepository, StoreOptions,
};
use rusqlite::{params, Connection};

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn insert_raw(
    conn: &Connection,
    email: Option<&str>,
    phone: Option<&str>,
    linked_id: Option<i64>,
    created_at: i64,
) -> i64 {
    let precedence = if linked_id.is_some() {
        "secondary"
    } else {
        "primary"
    };
    conn.execute(
        "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
        params![email, phone, linked_id, precedence, created_at],
    )
    .unwrap();
    conn.last_insert_rowid()
}

#[test]
fn create_assigns_ids_and_non_decreasing_timestamps() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::new(&conn);

    let first = repo
        .create_contact(&NewContact::primary(text("doc@hill.valley"), None))
        .unwrap();
    let second = repo
        .create_contact(&NewContact::secondary(None, text("555"), first.id))
        .unwrap();

    assert!(second.id > first.id);
    assert!(second.created_at >= first.created_at);
    assert_eq!(first.link, LinkPrecedence::Primary);
    assert_eq!(
        second.link,
        LinkPrecedence::Secondary {
            linked_id: first.id
        }
    );
    assert_eq!(first.created_at, first.updated_at);
}

#[test]
fn created_at_never_goes_backwards_even_after_future_rows() {
    let conn = open_db_in_memory().unwrap();
    let far_future = 32_503_680_000_000;
    insert_raw(&conn, Some("future@x.io"), None, None, far_future);

    let repo = SqliteContactRepository::new(&conn);
    let created = repo
        .create_contact(&NewContact::primary(text("now@x.io"), None))
        .unwrap();
    assert_eq!(created.created_at, far_future);
}

#[test]
fn create_rejects_empty_drafts_and_links_to_secondaries() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::new(&conn);

    let err = repo
        .create_contact(&NewContact::primary(None, None))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let primary = repo
        .create_contact(&NewContact::primary(text("a@x.io"), None))
        .unwrap();
    let secondary = repo
        .create_contact(&NewContact::secondary(None, text("1"), primary.id))
        .unwrap();

    let err = repo
        .create_contact(&NewContact::secondary(None, text("2"), secondary.id))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidLink { .. }));

    let err = repo
        .create_contact(&NewContact::secondary(None, text("3"), 9_999))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidLink { .. }));
}

#[test]
fn find_matching_uses_only_present_fields() {
    let conn = open_db_in_memory().unwrap();
    let email_only = insert_raw(&conn, Some("a@x.io"), None, None, 10);
    let phone_only = insert_raw(&conn, None, Some("111"), None, 20);
    insert_raw(&conn, Some("z@x.io"), Some("999"), None, 30);
    let repo = SqliteContactRepository::new(&conn);

    let by_email = repo.find_matching(Some("a@x.io"), None).unwrap();
    assert_eq!(
        by_email.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![email_only]
    );

    // An absent phone must not match rows whose phone is also absent.
    let by_phone = repo.find_matching(None, Some("111")).unwrap();
    assert_eq!(
        by_phone.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![phone_only]
    );

    let either = repo.find_matching(Some("a@x.io"), Some("111")).unwrap();
    assert_eq!(
        either.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![email_only, phone_only]
    );

    assert!(repo.find_matching(None, None).unwrap().is_empty());
}

#[test]
fn find_matching_orders_by_created_at_then_id() {
    let conn = open_db_in_memory().unwrap();
    let late = insert_raw(&conn, Some("a@x.io"), None, None, 500);
    let tie_low = insert_raw(&conn, None, Some("111"), None, 100);
    let tie_high = insert_raw(&conn, Some("a@x.io"), Some("111"), None, 100);
    let repo = SqliteContactRepository::new(&conn);

    let matches = repo.find_matching(Some("a@x.io"), Some("111")).unwrap();
    assert_eq!(
        matches.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![tie_low, tie_high, late]
    );
}

#[test]
fn update_link_refuses_to_create_chains() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::new(&conn);
    let survivor = repo
        .create_contact(&NewContact::primary(text("a@x.io"), None))
        .unwrap();
    let newer = repo
        .create_contact(&NewContact::primary(None, text("222")))
        .unwrap();
    let child = repo
        .create_contact(&NewContact::secondary(text("c@x.io"), None, newer.id))
        .unwrap();

    let demote = LinkPrecedence::Secondary {
        linked_id: survivor.id,
    };
    let err = repo.update_link(newer.id, demote).unwrap_err();
    assert!(matches!(err, RepoError::InvalidLink { .. }));

    assert_eq!(repo.relink_secondaries(newer.id, survivor.id).unwrap(), 1);
    repo.update_link(newer.id, demote).unwrap();

    let cluster = repo.find_cluster(survivor.id).unwrap();
    assert_eq!(
        cluster.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![survivor.id, newer.id, child.id]
    );
    assert!(cluster[1..]
        .iter()
        .all(|c| c.link.linked_id() == Some(survivor.id)));
}

#[test]
fn update_link_reports_missing_contacts_and_self_links() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::new(&conn);
    let primary = repo
        .create_contact(&NewContact::primary(text("a@x.io"), None))
        .unwrap();

    let err = repo
        .update_link(404, LinkPrecedence::Primary)
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(404)));

    let err = repo
        .update_link(
            primary.id,
            LinkPrecedence::Secondary {
                linked_id: primary.id,
            },
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[test]
fn corrupted_rows_are_rejected_on_read() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch("PRAGMA ignore_check_constraints = ON;")
        .unwrap();
    let id = insert_raw(&conn, Some("a@x.io"), None, None, 1);
    conn.execute(
        "UPDATE contacts SET link_precedence = 'orphan' WHERE id = ?1;",
        [id],
    )
    .unwrap();

    let repo = SqliteContactRepository::new(&conn);
    let err = repo.get_contact(id).unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}

#[test]
fn store_transactions_commit_and_count() {
    let store = ContactStore::open_in_memory(StoreOptions::default()).unwrap();

    let created = store
        .with_transaction(|repo| {
            let primary = repo.create_contact(&NewContact::primary(text("a@x.io"), None))?;
            repo.create_contact(&NewContact::secondary(None, text("1"), primary.id))?;
            Ok(primary)
        })
        .unwrap();

    let (count, cluster) = store
        .with_snapshot(|repo| Ok((repo.count_contacts()?, repo.find_cluster(created.id)?)))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(cluster.len(), 2);
}

#[test]
fn opening_store_in_missing_directory_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let err = ContactStore::open_file(
        dir.path().join("missing").join("contacts.db"),
        StoreOptions::default(),
    )
    .err()
    .unwrap();

    assert!(err.is_unavailable());
    assert!(!err.is_transient());
}
