//! [`KeyCollection`] implementation over a MongoDB collection.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{Client, Collection, Database};
use xmlkeys_storage::{KeyCollection, KeyRecord, RecordFilter, RecordId, StoreError, StoreResult};

use crate::{
    config::MongoKeyStoreConfig,
    document::{KeyDocument, filter_document},
    error::{MongoStoreError, Result, is_duplicate_key},
};

/// Key records stored in a MongoDB collection.
///
/// Cloning is cheap; clones share the driver's connection pool.
///
/// # Example
///
/// ```no_run
/// use xmlkeys_storage_mongodb::{MongoKeyCollection, MongoKeyStoreConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = MongoKeyStoreConfig::builder()
///     .connection_string("mongodb://localhost:27017")
///     .database("identity")
///     .collection("dataProtectionKeys")
///     .build()?;
///
/// let collection = MongoKeyCollection::connect(&config).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MongoKeyCollection {
    collection: Collection<KeyDocument>,
}

impl std::fmt::Debug for MongoKeyCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoKeyCollection")
            .field("namespace", &self.collection.namespace().to_string())
            .finish_non_exhaustive()
    }
}

impl MongoKeyCollection {
    /// Creates a client from the configuration and opens the collection.
    ///
    /// The driver connects lazily, so an unreachable server surfaces on the
    /// first operation rather than here.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the connection
    /// string cannot be parsed.
    pub async fn connect(config: &MongoKeyStoreConfig) -> Result<Self> {
        let options = config.client_options().await?;
        let client = Client::with_options(options)?;

        tracing::debug!(
            database = config.database(),
            collection = config.collection(),
            "opened MongoDB key collection"
        );
        Ok(Self::from_database(&client.database(config.database()), config.collection()))
    }

    /// Opens a collection in a database the host already holds.
    #[must_use]
    pub fn from_database(database: &Database, collection: &str) -> Self {
        Self::from_collection(database.collection(collection))
    }

    /// Wraps an existing typed collection handle.
    #[must_use]
    pub fn from_collection(collection: Collection<KeyDocument>) -> Self {
        Self { collection }
    }

    /// Returns the underlying driver collection.
    #[must_use]
    pub fn inner(&self) -> &Collection<KeyDocument> {
        &self.collection
    }
}

#[async_trait]
impl KeyCollection for MongoKeyCollection {
    #[tracing::instrument(skip(self, record), fields(key_id = record.key_id()))]
    async fn insert_one(&self, record: KeyRecord) -> StoreResult<RecordId> {
        let document = KeyDocument::try_from(&record)?;
        let requested = document.id;

        let result = self.collection.insert_one(&document).await.map_err(|err| {
            if is_duplicate_key(&err) {
                StoreError::conflict(requested.map(|id| id.to_hex()).unwrap_or_default())
            } else {
                StoreError::from(MongoStoreError::from(err))
            }
        })?;

        let id = result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StoreError::internal("MongoDB returned a non-ObjectId _id"))?;
        Ok(RecordId::from(id.to_hex()))
    }

    #[tracing::instrument(skip(self))]
    async fn find(&self, filter: &RecordFilter) -> StoreResult<Vec<KeyRecord>> {
        let cursor =
            self.collection.find(filter_document(filter)).await.map_err(MongoStoreError::from)?;
        let documents: Vec<KeyDocument> =
            cursor.try_collect().await.map_err(MongoStoreError::from)?;

        Ok(documents.into_iter().map(KeyRecord::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_many(&self, filter: &RecordFilter) -> StoreResult<u64> {
        let result = self
            .collection
            .delete_many(filter_document(filter))
            .await
            .map_err(MongoStoreError::from)?;

        Ok(result.deleted_count)
    }
}
