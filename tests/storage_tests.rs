use chrono::Utc;
use sharex_server::reference::{is_valid_reference, ReferenceGenerator};
use sharex_server::storage::models::{EntryRecord, UserRecord};
use sharex_server::storage::{Database, DatabaseError, ReservedReferences};
use uuid::Uuid;

fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.ensure_tables().unwrap();
    (dir, db)
}

fn reserve(db: &Database, id: &str) -> ReservedReferences {
    db.reserve_references(id, &ReferenceGenerator::default(), 6, 16)
        .unwrap()
}

fn sample_entry(id: &str, reserved: &ReservedReferences) -> EntryRecord {
    EntryRecord {
        id: id.to_string(),
        call_reference: reserved.call_reference.clone(),
        delete_reference: reserved.delete_reference.clone(),
        author: Uuid::new_v4(),
        filename: "cat.png".to_string(),
        content_type: "image/png".to_string(),
        byte_size: 1024,
        upload_date: Utc::now(),
    }
}

fn sample_user(username: &str) -> UserRecord {
    UserRecord {
        uuid: Uuid::new_v4(),
        username: username.to_string(),
        password_hash: "$argon2id$placeholder".to_string(),
        token_digest: None,
        created_at: Utc::now(),
    }
}

#[test]
fn test_reserve_references_shapes() {
    let (_dir, db) = test_db();
    let reserved = reserve(&db, "entry-1");

    assert!(is_valid_reference(&reserved.call_reference, 6));
    assert!(is_valid_reference(&reserved.delete_reference, 16));
    assert!(db.call_reference_exists(&reserved.call_reference).unwrap());
    assert!(db.delete_reference_exists(&reserved.delete_reference).unwrap());
}

#[test]
fn test_reserved_entry_is_not_visible_until_committed() {
    let (_dir, db) = test_db();
    let reserved = reserve(&db, "entry-1");

    assert!(db
        .get_entry_by_call_reference(&reserved.call_reference)
        .unwrap()
        .is_none());
    assert_eq!(db.entry_count().unwrap(), 0);

    let entry = sample_entry("entry-1", &reserved);
    db.commit_entry(&entry).unwrap();

    let found = db
        .get_entry_by_call_reference(&reserved.call_reference)
        .unwrap()
        .unwrap();
    assert_eq!(found, entry);
    assert_eq!(db.entry_count().unwrap(), 1);
}

#[test]
fn test_release_references() {
    let (_dir, db) = test_db();
    let reserved = reserve(&db, "entry-1");

    db.release_references("entry-1", &reserved).unwrap();
    assert!(!db.call_reference_exists(&reserved.call_reference).unwrap());
    assert!(!db.delete_reference_exists(&reserved.delete_reference).unwrap());

    // Committing after the release is refused
    let entry = sample_entry("entry-1", &reserved);
    assert!(matches!(
        db.commit_entry(&entry),
        Err(DatabaseError::Conflict(_))
    ));
}

#[test]
fn test_release_keeps_committed_entry() {
    let (_dir, db) = test_db();
    let reserved = reserve(&db, "entry-1");
    db.commit_entry(&sample_entry("entry-1", &reserved)).unwrap();

    db.release_references("entry-1", &reserved).unwrap();
    assert!(db
        .get_entry_by_call_reference(&reserved.call_reference)
        .unwrap()
        .is_some());
}

#[test]
fn test_remove_entry_by_delete_reference() {
    let (_dir, db) = test_db();
    let reserved = reserve(&db, "entry-1");
    let entry = sample_entry("entry-1", &reserved);
    db.commit_entry(&entry).unwrap();

    let removed = db
        .remove_entry_by_delete_reference(&reserved.delete_reference)
        .unwrap();
    assert_eq!(removed, Some(entry));

    assert!(db
        .get_entry_by_call_reference(&reserved.call_reference)
        .unwrap()
        .is_none());
    assert!(!db.call_reference_exists(&reserved.call_reference).unwrap());
    assert!(db
        .remove_entry_by_delete_reference(&reserved.delete_reference)
        .unwrap()
        .is_none());
}

#[test]
fn test_remove_ignores_call_reference() {
    let (_dir, db) = test_db();
    let reserved = reserve(&db, "entry-1");
    db.commit_entry(&sample_entry("entry-1", &reserved)).unwrap();

    assert!(db
        .remove_entry_by_delete_reference(&reserved.call_reference)
        .unwrap()
        .is_none());
    assert_eq!(db.entry_count().unwrap(), 1);
}

#[test]
fn test_many_reservations_are_distinct() {
    let (_dir, db) = test_db();
    let generator = ReferenceGenerator::default();

    let mut calls = std::collections::HashSet::new();
    let mut deletes = std::collections::HashSet::new();
    for i in 0..200 {
        // Short call references make collisions likely and force retries
        let reserved = db
            .reserve_references(&format!("entry-{i}"), &generator, 2, 16)
            .unwrap();
        assert!(calls.insert(reserved.call_reference));
        assert!(deletes.insert(reserved.delete_reference));
    }
}

#[test]
fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let entry = {
        let db = Database::open(dir.path()).unwrap();
        db.ensure_tables().unwrap();
        let reserved = reserve(&db, "entry-1");
        let entry = sample_entry("entry-1", &reserved);
        db.commit_entry(&entry).unwrap();
        entry
    };

    let db = Database::open(dir.path()).unwrap();
    let found = db
        .get_entry_by_call_reference(&entry.call_reference)
        .unwrap();
    assert_eq!(found, Some(entry));
}

#[test]
fn test_insert_and_get_user() {
    let (_dir, db) = test_db();
    let user = sample_user("alice");

    assert!(db.insert_user(&user).unwrap());
    assert_eq!(db.get_user(&user.uuid).unwrap(), Some(user.clone()));
    assert_eq!(db.get_user_by_username("alice").unwrap(), Some(user.clone()));

    // Same username, different uuid
    assert!(!db.insert_user(&sample_user("alice")).unwrap());
}

#[test]
fn test_token_digest_index() {
    let (_dir, db) = test_db();
    let alice = sample_user("alice");
    let bob = sample_user("bob");
    db.insert_user(&alice).unwrap();
    db.insert_user(&bob).unwrap();

    assert!(db.set_token_digest(&alice.uuid, "digest-a").unwrap());
    assert_eq!(
        db.get_user_id_by_token_digest("digest-a").unwrap(),
        Some(alice.uuid)
    );

    // A digest belongs to one user only
    assert!(matches!(
        db.set_token_digest(&bob.uuid, "digest-a"),
        Err(DatabaseError::Conflict(_))
    ));

    // Replacing the digest revokes the old one
    assert!(db.set_token_digest(&alice.uuid, "digest-b").unwrap());
    assert!(!db.token_digest_exists("digest-a").unwrap());
    assert_eq!(
        db.get_user_id_by_token_digest("digest-b").unwrap(),
        Some(alice.uuid)
    );

    assert!(!db.set_token_digest(&Uuid::new_v4(), "digest-c").unwrap());
}

#[test]
fn test_rename_user() {
    let (_dir, db) = test_db();
    let alice = sample_user("alice");
    db.insert_user(&alice).unwrap();
    db.insert_user(&sample_user("bob")).unwrap();

    assert_eq!(db.rename_user(&alice.uuid, "bob").unwrap(), Some(false));
    assert_eq!(db.rename_user(&alice.uuid, "carol").unwrap(), Some(true));
    assert!(db.get_user_by_username("alice").unwrap().is_none());
    assert_eq!(
        db.get_user_by_username("carol").unwrap().map(|u| u.uuid),
        Some(alice.uuid)
    );
    assert_eq!(db.rename_user(&Uuid::new_v4(), "dave").unwrap(), None);
}

#[test]
fn test_delete_user_cleans_indexes() {
    let (_dir, db) = test_db();
    let alice = sample_user("alice");
    db.insert_user(&alice).unwrap();
    db.set_token_digest(&alice.uuid, "digest-a").unwrap();

    assert!(db.delete_user(&alice.uuid).unwrap());
    assert!(db.get_user_by_username("alice").unwrap().is_none());
    assert!(!db.token_digest_exists("digest-a").unwrap());
    assert!(!db.delete_user(&alice.uuid).unwrap());

    // The username is free again
    assert!(db.insert_user(&sample_user("alice")).unwrap());
}
