//! Integration tests for the MongoDB key collection against a real server.
//!
//! These tests are skipped unless the `RUN_MONGODB_INTEGRATION_TESTS`
//! environment variable is set.
//!
//! # Running the tests
//!
//! ```bash
//! docker run --rm -d -p 27017:27017 mongo:7
//!
//! RUN_MONGODB_INTEGRATION_TESTS=1 \
//! MONGODB_URL=mongodb://localhost:27017 \
//! cargo test -p xmlkeys-storage-mongodb --test real_mongodb_integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{
    collections::BTreeSet,
    env,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{Duration, Utc};
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use xmlkeys_storage::{
    KeyAuthority, KeyCollection, KeyDescriptor, KeyRecord, KeyRepository, KeyRepositoryOptions,
    KeyStoreBuilder, RecordFilter, StoreResult, UnidentifiedRecords, XmlElement,
    assert_malformed_payload, conformance, fixed_resolver,
    testutil::{
        EXPIRED_KEY_ID, EXPIRED_KEY_XML, MemoryKeyManager, SAMPLE_KEY_ID, SAMPLE_KEY_XML,
        key_element, stored_key_ids,
    },
};
use xmlkeys_storage_mongodb::{MongoKeyCollection, MongoKeyStoreBuilderExt, MongoKeyStoreConfig};

// ============================================================================
// Test Configuration
// ============================================================================

/// Per-process counter for unique collection names.
static COLLECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Check if real MongoDB integration tests should run.
fn should_run() -> bool {
    env::var("RUN_MONGODB_INTEGRATION_TESTS").is_ok()
}

/// Get the MongoDB URL from environment, or default.
fn mongodb_url() -> String {
    env::var("MONGODB_URL").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

/// Get the test database from environment, or default.
fn database_name() -> String {
    env::var("MONGODB_DATABASE").unwrap_or_else(|_| "xmlkeys_integration".to_string())
}

/// Config for a collection no other test (or earlier run) uses.
fn unique_config() -> MongoKeyStoreConfig {
    let n = COLLECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
    MongoKeyStoreConfig::builder()
        .connection_string(mongodb_url())
        .database(database_name())
        .collection(format!("keys_{}_{n}", ObjectId::new().to_hex()))
        .app_name("xmlkeys-integration")
        .build()
        .expect("valid config")
}

async fn fresh_collection() -> MongoKeyCollection {
    MongoKeyCollection::connect(&unique_config()).await.expect("connect")
}

/// Untyped handle on the same collection, for writing documents directly.
fn raw(collection: &MongoKeyCollection) -> mongodb::Collection<Document> {
    collection.inner().clone_with_type()
}

macro_rules! skip_unless_enabled {
    () => {
        if !should_run() {
            eprintln!("Skipping real MongoDB test (RUN_MONGODB_INTEGRATION_TESTS not set)");
            return;
        }
    };
}

struct FixedAuthority(Vec<KeyDescriptor>);

#[async_trait::async_trait]
impl KeyAuthority for FixedAuthority {
    async fn get_all_keys(&self) -> StoreResult<Vec<KeyDescriptor>> {
        Ok(self.0.clone())
    }
}

fn key(id: &str) -> XmlElement {
    let now = Utc::now();
    key_element(id, now, now, now + Duration::days(90))
}

fn ids<S: AsRef<str>>(values: &[S]) -> BTreeSet<String> {
    values.iter().map(|v| v.as_ref().to_owned()).collect()
}

// ============================================================================
// Conformance
// ============================================================================

#[tokio::test]
async fn conformance_suite() {
    skip_unless_enabled!();
    conformance::run_all(fresh_collection).await;
}

// ============================================================================
// Stored layout
// ============================================================================

#[tokio::test]
async fn stored_document_layout() {
    skip_unless_enabled!();
    let collection = fresh_collection().await;
    collection
        .insert_one(KeyRecord::from_raw(SAMPLE_KEY_XML, Some(SAMPLE_KEY_ID.to_owned())))
        .await
        .unwrap();

    let stored = raw(&collection).find_one(doc! {}).await.unwrap().expect("one document");

    assert!(matches!(stored.get("_id"), Some(Bson::ObjectId(_))));
    assert_eq!(stored.get_str("key").unwrap(), SAMPLE_KEY_XML);
    assert_eq!(stored.get_str("keyId").unwrap(), SAMPLE_KEY_ID);
}

#[tokio::test]
async fn legacy_documents_are_read() {
    skip_unless_enabled!();
    let collection = fresh_collection().await;
    raw(&collection)
        .insert_many([
            doc! { "Key": SAMPLE_KEY_XML, "KeyId": SAMPLE_KEY_ID },
            doc! { "key": EXPIRED_KEY_XML },
            doc! { "key": "<revocation/>", "keyId": Bson::Null },
        ])
        .await
        .unwrap();

    let repository = KeyRepository::new(
        Arc::new(collection.clone()),
        fixed_resolver(Arc::new(FixedAuthority(Vec::new()))),
    );
    let read = repository.get_all_elements().await.expect("read");

    assert_eq!(read.len(), 3);
    assert_eq!(stored_key_ids(&collection).await, ids(&[SAMPLE_KEY_ID]));
    let read_ids: BTreeSet<_> =
        read.iter().filter_map(|e| e.attribute("id").map(str::to_owned)).collect();
    assert_eq!(read_ids, ids(&[SAMPLE_KEY_ID, EXPIRED_KEY_ID]));
}

#[tokio::test]
async fn document_without_payload_fails_the_read() {
    skip_unless_enabled!();
    let collection = fresh_collection().await;
    collection.insert_one(KeyRecord::from_raw(SAMPLE_KEY_XML, None)).await.unwrap();
    raw(&collection).insert_one(doc! { "keyId": "broken" }).await.unwrap();

    let result = collection.find(&RecordFilter::All).await;

    assert_malformed_payload!(result);
}

// ============================================================================
// Cleanup
// ============================================================================

fn cleanup_repository(
    collection: &MongoKeyCollection,
    authority: Vec<KeyDescriptor>,
    unidentified: UnidentifiedRecords,
) -> KeyRepository {
    let options = KeyRepositoryOptions::builder()
        .cleanup_enabled(true)
        .unidentified_records(unidentified)
        .build()
        .unwrap();
    KeyRepository::with_options(
        Arc::new(collection.clone()),
        fixed_resolver(Arc::new(FixedAuthority(authority))),
        options,
    )
    .unwrap()
}

fn abc_authority() -> Vec<KeyDescriptor> {
    let now = Utc::now();
    vec![
        KeyDescriptor::new("A", now + Duration::days(30)),
        KeyDescriptor::new("B", now - Duration::days(1)),
        KeyDescriptor::new("C", now + Duration::days(30)).revoked(),
    ]
}

#[tokio::test]
async fn cleanup_keeps_only_valid_keys() {
    skip_unless_enabled!();
    let collection = fresh_collection().await;
    let repository = cleanup_repository(&collection, abc_authority(), UnidentifiedRecords::Remove);
    for id in ["A", "B", "C", "D"] {
        collection.insert_one(KeyRecord::from_element(&key(id)).unwrap()).await.unwrap();
    }
    raw(&collection)
        .insert_one(doc! { "key": "<revocation/>", "keyId": Bson::Null })
        .await
        .unwrap();

    let removed = repository.remove_stale_records().await.expect("cleanup");

    assert_eq!(removed, 4);
    assert_eq!(stored_key_ids(&collection).await, ids(&["A"]));
    assert_eq!(collection.find(&RecordFilter::All).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cleanup_can_retain_unidentified_records() {
    skip_unless_enabled!();
    let collection = fresh_collection().await;
    let repository = cleanup_repository(&collection, abc_authority(), UnidentifiedRecords::Retain);
    for id in ["A", "B", "C", "D"] {
        collection.insert_one(KeyRecord::from_element(&key(id)).unwrap()).await.unwrap();
    }
    raw(&collection)
        .insert_many([
            doc! { "key": "<revocation/>", "keyId": Bson::Null },
            doc! { "Key": "<revocation/>" },
        ])
        .await
        .unwrap();

    let removed = repository.remove_stale_records().await.expect("cleanup");

    assert_eq!(removed, 3);
    assert_eq!(stored_key_ids(&collection).await, ids(&["A"]));
    assert_eq!(collection.find(&RecordFilter::All).await.unwrap().len(), 3);
}

#[rstest::rstest]
#[case::remove_unidentified(UnidentifiedRecords::Remove, 1)]
#[case::retain_unidentified(UnidentifiedRecords::Retain, 2)]
#[tokio::test]
async fn cleanup_over_legacy_documents(
    #[case] unidentified: UnidentifiedRecords,
    #[case] remaining: usize,
) {
    skip_unless_enabled!();
    let collection = fresh_collection().await;
    let repository = cleanup_repository(&collection, abc_authority(), unidentified);
    let legacy = |id: &str| {
        doc! { "Key": key(id).to_compact_string().unwrap(), "KeyId": id }
    };
    raw(&collection)
        .insert_many([legacy("A"), legacy("B"), legacy("C"), doc! { "Key": "<revocation/>" }])
        .await
        .unwrap();

    repository.remove_stale_records().await.expect("cleanup");

    assert_eq!(stored_key_ids(&collection).await, ids(&["A"]));
    assert_eq!(collection.find(&RecordFilter::All).await.unwrap().len(), remaining);
    let found = collection.find(&RecordFilter::KeyIdEquals("A".into())).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key_id(), Some("A"));
}

#[tokio::test]
async fn managed_key_ring_over_mongodb() {
    skip_unless_enabled!();
    let collection = fresh_collection().await;
    collection
        .insert_one(KeyRecord::from_raw(EXPIRED_KEY_XML, Some(EXPIRED_KEY_ID.to_owned())))
        .await
        .unwrap();

    let builder = KeyStoreBuilder::new()
        .persist_keys_to_mongodb_collection(collection.inner().clone())
        .add_key_cleanup()
        .unwrap();
    let slot = builder.authority_slot();
    let repository = Arc::new(builder.build().unwrap());
    let manager = Arc::new(MemoryKeyManager::new(Arc::clone(&repository)));
    slot.register(&manager).unwrap();

    let now = Utc::now();
    let revoked = manager.create_new_key(now, now + Duration::days(90)).await.unwrap();
    let kept = manager.create_new_key(now, now + Duration::days(90)).await.unwrap();
    manager.revoke_key(&revoked, Some("rotated")).await.unwrap();

    assert_eq!(stored_key_ids(&collection).await, ids(&[&kept]));
    assert_eq!(repository.get_all_elements().await.unwrap().len(), 1);
}

#[tokio::test]
async fn builder_connects_from_config() {
    skip_unless_enabled!();
    let config = unique_config();
    let repository = KeyStoreBuilder::new()
        .persist_keys_to_mongodb(&config)
        .await
        .expect("connect")
        .build()
        .unwrap();

    repository.store_element(&key("from-config"), None).await.unwrap();

    let read = repository.get_all_elements().await.unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].attribute("id"), Some("from-config"));
}
