//! Storage collection contract.
//!
//! [`KeyCollection`] is the document-collection primitive the repository is
//! built on: insert one record, read by predicate, delete by predicate. The
//! repository owns all key-management logic; a collection only stores and
//! filters records.
//!
//! # Implementing a Collection
//!
//! 1. Implement [`KeyCollection`]
//! 2. Translate every [`RecordFilter`] into one store-side predicate
//! 3. Map driver errors to [`StoreError`](crate::StoreError)
//!
//! See [`MemoryKeyCollection`](crate::MemoryKeyCollection) for a reference
//! implementation and [`conformance`](crate::conformance) (behind the
//! `testutil` feature) for the shared test suite.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;

use crate::{error::StoreResult, record::KeyRecord, types::RecordId};

/// Predicate over stored key records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordFilter {
    /// Matches every record.
    All,
    /// Matches records whose key id equals the value.
    KeyIdEquals(String),
    /// Matches records whose key id is not in `key_ids`.
    KeyIdNotIn {
        /// Key ids that must not match.
        key_ids: BTreeSet<String>,
        /// Whether records without a key id match as well.
        include_unidentified: bool,
    },
}

impl RecordFilter {
    /// Evaluates the filter against a record on the client side.
    ///
    /// Backends with a query language translate the filter instead; this is
    /// the reference semantics they must agree with.
    #[must_use]
    pub fn matches(&self, record: &KeyRecord) -> bool {
        match (self, record.key_id()) {
            (Self::All, _) => true,
            (Self::KeyIdEquals(expected), Some(key_id)) => expected == key_id,
            (Self::KeyIdEquals(_), None) => false,
            (Self::KeyIdNotIn { key_ids, .. }, Some(key_id)) => !key_ids.contains(key_id),
            (Self::KeyIdNotIn { include_unidentified, .. }, None) => *include_unidentified,
        }
    }
}

/// Document collection holding key records.
///
/// Implementations must be thread-safe and must not retry internally:
/// retries belong to the driver or the caller.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`insert_one`](KeyCollection::insert_one) | Persist a record, returning its storage id |
/// | [`find`](KeyCollection::find) | Read all records matching a filter |
/// | [`delete_many`](KeyCollection::delete_many) | Delete all matching records in one statement |
///
/// # Example
///
/// ```
/// use xmlkeys_storage::{KeyCollection, KeyRecord, MemoryKeyCollection, RecordFilter};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let collection = MemoryKeyCollection::new();
/// collection.insert_one(KeyRecord::from_raw("<key id=\"a\"/>", Some("a".into()))).await.unwrap();
///
/// let found = collection.find(&RecordFilter::KeyIdEquals("a".into())).await.unwrap();
/// assert_eq!(found.len(), 1);
/// # });
/// ```
#[async_trait]
pub trait KeyCollection: Send + Sync {
    /// Persists one record and returns the storage id assigned to it.
    ///
    /// A record that already carries an id is stored under that id; if a
    /// record with the same id exists the call fails with
    /// [`Conflict`](crate::StoreError::Conflict).
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn insert_one(&self, record: KeyRecord) -> StoreResult<RecordId>;

    /// Returns every record matching `filter`, in no guaranteed order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn find(&self, filter: &RecordFilter) -> StoreResult<Vec<KeyRecord>>;

    /// Deletes every record matching `filter` and returns how many were removed.
    ///
    /// Issued as a single store-side statement.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete_many(&self, filter: &RecordFilter) -> StoreResult<u64>;
}

#[async_trait]
impl<T: KeyCollection + ?Sized> KeyCollection for Arc<T> {
    async fn insert_one(&self, record: KeyRecord) -> StoreResult<RecordId> {
        (**self).insert_one(record).await
    }

    async fn find(&self, filter: &RecordFilter) -> StoreResult<Vec<KeyRecord>> {
        (**self).find(filter).await
    }

    async fn delete_many(&self, filter: &RecordFilter) -> StoreResult<u64> {
        (**self).delete_many(filter).await
    }
}
