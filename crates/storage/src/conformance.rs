//! Conformance test suite for [`KeyCollection`] implementations.
//!
//! Every collection, in-memory or database-backed, runs the same checks so
//! the repository can rely on one set of semantics. Each function expects a
//! fresh, empty collection.
//!
//! # Usage
//!
//! ```no_run
//! use xmlkeys_storage::{MemoryKeyCollection, conformance};
//!
//! #[tokio::test]
//! async fn find_by_key_id() {
//!     conformance::find_by_key_id(&MemoryKeyCollection::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | Insert | Id assignment, payload fidelity, conflicts |
//! | Find | Filter semantics on read |
//! | Delete | Filter semantics on delete, counts, idempotence |
//! | Concurrent | Thread-safety under parallel inserts |

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    assert_conflict,
    collection::{KeyCollection, RecordFilter},
    record::KeyRecord,
    testutil::{SAMPLE_KEY_ID, SAMPLE_KEY_XML, stored_key_ids},
};

fn record(key_id: &str) -> KeyRecord {
    KeyRecord::from_raw(format!(r#"<key id="{key_id}"/>"#), Some(key_id.to_owned()))
}

fn unidentified() -> KeyRecord {
    KeyRecord::from_raw(r#"<revocation version="1"/>"#, None)
}

fn not_in(ids: &[&str], include_unidentified: bool) -> RecordFilter {
    RecordFilter::KeyIdNotIn {
        key_ids: ids.iter().map(|id| (*id).to_owned()).collect(),
        include_unidentified,
    }
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| (*id).to_owned()).collect()
}

async fn seed<C: KeyCollection>(collection: &C, key_ids: &[&str]) {
    for key_id in key_ids {
        collection.insert_one(record(key_id)).await.expect("seed insert should succeed");
    }
}

// ============================================================================
// Insert
// ============================================================================

/// Each insert gets its own storage id.
pub async fn insert_returns_distinct_ids<C: KeyCollection>(collection: &C) {
    let first = collection.insert_one(record("a")).await.expect("insert a");
    let second = collection.insert_one(record("b")).await.expect("insert b");
    assert_ne!(first, second, "storage ids must be unique");
}

/// Payload and key id come back exactly as written, with the id filled in.
pub async fn insert_preserves_payload_and_key_id<C: KeyCollection>(collection: &C) {
    let written = KeyRecord::from_raw(SAMPLE_KEY_XML, Some(SAMPLE_KEY_ID.to_owned()));
    let id = collection.insert_one(written).await.expect("insert");

    let found = collection.find(&RecordFilter::All).await.expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].payload(), SAMPLE_KEY_XML, "payload must be stored byte-for-byte");
    assert_eq!(found[0].key_id(), Some(SAMPLE_KEY_ID));
    assert_eq!(found[0].id(), Some(&id));
}

/// A record without a key id is stored and read back without one.
pub async fn insert_unidentified_record<C: KeyCollection>(collection: &C) {
    collection.insert_one(unidentified()).await.expect("insert");

    let found = collection.find(&RecordFilter::All).await.expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key_id(), None);
}

/// Inserting a record under an id that already exists fails with `Conflict`.
pub async fn insert_with_existing_id_conflicts<C: KeyCollection>(collection: &C) {
    let id = collection.insert_one(record("a")).await.expect("insert");

    let result = collection.insert_one(record("b").with_id(id)).await;
    assert_conflict!(result);

    let found = collection.find(&RecordFilter::All).await.expect("find");
    assert_eq!(found.len(), 1, "a conflicting insert must not write anything");
}

// ============================================================================
// Find
// ============================================================================

/// `find(All)` on an empty collection is an empty vector, not an error.
pub async fn find_all_on_empty_collection<C: KeyCollection>(collection: &C) {
    let found = collection.find(&RecordFilter::All).await.expect("find");
    assert!(found.is_empty());
}

/// `find(All)` returns every record, identified or not.
pub async fn find_all_returns_every_record<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b", "c"]).await;
    collection.insert_one(unidentified()).await.expect("insert unidentified");

    let found = collection.find(&RecordFilter::All).await.expect("find");
    assert_eq!(found.len(), 4);
    assert_eq!(stored_key_ids(collection).await, set(&["a", "b", "c"]));
}

/// `find(KeyIdEquals)` returns only the matching record.
pub async fn find_by_key_id<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b"]).await;
    collection.insert_one(unidentified()).await.expect("insert unidentified");

    let found = collection.find(&RecordFilter::KeyIdEquals("b".to_owned())).await.expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key_id(), Some("b"));

    let missing = collection.find(&RecordFilter::KeyIdEquals("z".to_owned())).await.expect("find");
    assert!(missing.is_empty());
}

/// `find(KeyIdNotIn)` agrees with [`RecordFilter::matches`].
pub async fn find_not_in<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b", "c"]).await;
    collection.insert_one(unidentified()).await.expect("insert unidentified");

    let identified_only = collection.find(&not_in(&["a"], false)).await.expect("find");
    assert_eq!(identified_only.len(), 2);

    let with_unidentified = collection.find(&not_in(&["a"], true)).await.expect("find");
    assert_eq!(with_unidentified.len(), 3);
}

// ============================================================================
// Delete
// ============================================================================

/// `delete_many(KeyIdNotIn)` keeps the listed ids and, by default, records
/// without a key id.
pub async fn delete_not_in_retains_unidentified<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b", "c", "d"]).await;
    collection.insert_one(unidentified()).await.expect("insert unidentified");

    let removed = collection.delete_many(&not_in(&["a"], false)).await.expect("delete");

    assert_eq!(removed, 3);
    assert_eq!(stored_key_ids(collection).await, set(&["a"]));
    assert_eq!(collection.find(&RecordFilter::All).await.expect("find").len(), 2);
}

/// `include_unidentified` also removes records without a key id.
pub async fn delete_not_in_includes_unidentified<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b"]).await;
    collection.insert_one(unidentified()).await.expect("insert unidentified");

    let removed = collection.delete_many(&not_in(&["a"], true)).await.expect("delete");

    assert_eq!(removed, 2);
    let remaining = collection.find(&RecordFilter::All).await.expect("find");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key_id(), Some("a"));
}

/// An empty valid set removes every identified record.
pub async fn delete_not_in_empty_set<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b"]).await;

    let removed = collection.delete_many(&not_in(&[], false)).await.expect("delete");

    assert_eq!(removed, 2);
    assert!(stored_key_ids(collection).await.is_empty());
}

/// `delete_many(KeyIdEquals)` removes only that key.
pub async fn delete_by_key_id<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b"]).await;

    let removed =
        collection.delete_many(&RecordFilter::KeyIdEquals("a".to_owned())).await.expect("delete");

    assert_eq!(removed, 1);
    assert_eq!(stored_key_ids(collection).await, set(&["b"]));
}

/// Repeating a delete with no write in between removes nothing.
pub async fn delete_is_idempotent<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b", "c"]).await;
    let filter = not_in(&["a"], false);

    let first = collection.delete_many(&filter).await.expect("first delete");
    let second = collection.delete_many(&filter).await.expect("second delete");

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(stored_key_ids(collection).await, set(&["a"]));
}

/// `delete_many(All)` empties the collection.
pub async fn delete_all<C: KeyCollection>(collection: &C) {
    seed(collection, &["a", "b"]).await;
    collection.insert_one(unidentified()).await.expect("insert unidentified");

    let removed = collection.delete_many(&RecordFilter::All).await.expect("delete");

    assert_eq!(removed, 3);
    assert!(collection.find(&RecordFilter::All).await.expect("find").is_empty());
}

// ============================================================================
// Concurrent
// ============================================================================

/// Parallel inserts all land, each with a unique id.
pub async fn concurrent_inserts<C: KeyCollection + 'static>(collection: Arc<C>) {
    let mut handles = Vec::new();
    for task in 0..8 {
        let collection = Arc::clone(&collection);
        handles.push(tokio::spawn(async move {
            collection.insert_one(record(&format!("task-{task}"))).await
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        let id = handle.await.expect("task should not panic").expect("insert should succeed");
        ids.insert(id);
    }

    assert_eq!(ids.len(), 8, "every insert must get a unique id");
    assert_eq!(stored_key_ids(collection.as_ref()).await.len(), 8);
}

// ============================================================================
// Runner
// ============================================================================

/// Runs every check, each against a fresh collection from `factory`.
pub async fn run_all<C, F, Fut>(factory: F)
where
    C: KeyCollection + 'static,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = C>,
{
    insert_returns_distinct_ids(&factory().await).await;
    insert_preserves_payload_and_key_id(&factory().await).await;
    insert_unidentified_record(&factory().await).await;
    insert_with_existing_id_conflicts(&factory().await).await;
    find_all_on_empty_collection(&factory().await).await;
    find_all_returns_every_record(&factory().await).await;
    find_by_key_id(&factory().await).await;
    find_not_in(&factory().await).await;
    delete_not_in_retains_unidentified(&factory().await).await;
    delete_not_in_includes_unidentified(&factory().await).await;
    delete_not_in_empty_set(&factory().await).await;
    delete_by_key_id(&factory().await).await;
    delete_is_idempotent(&factory().await).await;
    delete_all(&factory().await).await;
    concurrent_inserts(Arc::new(factory().await)).await;
}
