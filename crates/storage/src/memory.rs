//! In-memory key collection.
//!
//! [`MemoryKeyCollection`] implements [`KeyCollection`] over a vector guarded
//! by a [`parking_lot::RwLock`]. It is meant for tests and for hosts that do
//! not need keys to outlive the process.
//!
//! # Example
//!
//! ```
//! use xmlkeys_storage::{KeyCollection, KeyRecord, MemoryKeyCollection, RecordFilter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let collection = MemoryKeyCollection::new();
//!     let id = collection.insert_one(KeyRecord::from_raw("<key/>", None)).await.unwrap();
//!
//!     assert_eq!(id.as_str(), "1");
//!     assert_eq!(collection.find(&RecordFilter::All).await.unwrap().len(), 1);
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all records are lost when the process exits
//! - Lookups scan every record, which is fine for key-ring sized collections

use std::sync::Arc;

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    collection::{KeyCollection, RecordFilter},
    error::{StoreError, StoreResult},
    record::KeyRecord,
    types::RecordId,
};

#[derive(Default)]
struct Records {
    /// Records in insertion order.
    entries: Vec<KeyRecord>,
    next_id: u64,
}

impl Records {
    fn contains(&self, id: &RecordId) -> bool {
        self.entries.iter().any(|record| record.id() == Some(id))
    }

    /// Next sequential id not already taken by an explicitly-identified record.
    fn allocate_id(&mut self) -> RecordId {
        loop {
            self.next_id += 1;
            let id = RecordId::from(self.next_id.to_string());
            if !self.contains(&id) {
                return id;
            }
        }
    }
}

/// In-memory [`KeyCollection`].
///
/// # Cloning
///
/// Cheaply cloneable via [`Arc`]. All clones share the same records, so a
/// test can keep a clone to inspect what a repository stored.
#[derive(Clone, Default)]
pub struct MemoryKeyCollection {
    records: Arc<RwLock<Records>>,
}

impl MemoryKeyCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().entries.len()
    }

    /// Whether the collection holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().entries.is_empty()
    }
}

impl std::fmt::Debug for MemoryKeyCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyCollection").field("len", &self.len()).finish()
    }
}

#[async_trait]
impl KeyCollection for MemoryKeyCollection {
    #[tracing::instrument(skip(self, record), fields(key_id = record.key_id()))]
    async fn insert_one(&self, record: KeyRecord) -> StoreResult<RecordId> {
        fail_point!("key-collection-insert", |_| {
            Err(StoreError::storage_unavailable("injected failure on insert"))
        });

        let mut records = self.records.write();
        let id = match record.id() {
            Some(id) if records.contains(id) => return Err(StoreError::conflict(id.as_str())),
            Some(id) => id.clone(),
            None => records.allocate_id(),
        };
        records.entries.push(record.with_id(id.clone()));
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    async fn find(&self, filter: &RecordFilter) -> StoreResult<Vec<KeyRecord>> {
        fail_point!("key-collection-find", |_| {
            Err(StoreError::storage_unavailable("injected failure on find"))
        });

        let records = self.records.read();
        Ok(records.entries.iter().filter(|record| filter.matches(record)).cloned().collect())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_many(&self, filter: &RecordFilter) -> StoreResult<u64> {
        fail_point!("key-collection-delete", |_| {
            Err(StoreError::storage_unavailable("injected failure on delete"))
        });

        let mut records = self.records.write();
        let before = records.entries.len();
        records.entries.retain(|record| !filter.matches(record));
        Ok((before - records.entries.len()) as u64)
    }
}
