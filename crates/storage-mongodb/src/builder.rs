//! MongoDB backend selection on [`KeyStoreBuilder`].

use async_trait::async_trait;
use mongodb::{Collection, Database};
use xmlkeys_storage::{KeyStoreBuilder, StoreResult};

use crate::{collection::MongoKeyCollection, config::MongoKeyStoreConfig, document::KeyDocument};

/// Adds MongoDB persistence to [`KeyStoreBuilder`].
///
/// ```no_run
/// use xmlkeys_storage::KeyStoreBuilder;
/// use xmlkeys_storage_mongodb::{MongoKeyStoreBuilderExt, MongoKeyStoreConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = MongoKeyStoreConfig::builder()
///     .connection_string("mongodb://localhost:27017")
///     .database("identity")
///     .collection("dataProtectionKeys")
///     .build()?;
///
/// let repository = KeyStoreBuilder::new()
///     .persist_keys_to_mongodb(&config)
///     .await?
///     .add_key_cleanup()?
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait MongoKeyStoreBuilderExt: Sized {
    /// Connects with `config` and persists keys to the configured collection.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` for an invalid configuration, including
    /// a connection string the driver cannot parse, and
    /// `StoreError::StorageUnavailable` if resolving the hosts fails.
    async fn persist_keys_to_mongodb(self, config: &MongoKeyStoreConfig) -> StoreResult<Self>;

    /// Persists keys to `collection` in a database the host already holds.
    #[must_use]
    fn persist_keys_to_mongodb_database(self, database: &Database, collection: &str) -> Self;

    /// Persists keys to an existing typed collection handle.
    #[must_use]
    fn persist_keys_to_mongodb_collection(self, collection: Collection<KeyDocument>) -> Self;
}

#[async_trait]
impl MongoKeyStoreBuilderExt for KeyStoreBuilder {
    async fn persist_keys_to_mongodb(self, config: &MongoKeyStoreConfig) -> StoreResult<Self> {
        let collection = MongoKeyCollection::connect(config).await?;
        Ok(self.persist_keys_to(collection))
    }

    fn persist_keys_to_mongodb_database(self, database: &Database, collection: &str) -> Self {
        self.persist_keys_to(MongoKeyCollection::from_database(database, collection))
    }

    fn persist_keys_to_mongodb_collection(self, collection: Collection<KeyDocument>) -> Self {
        self.persist_keys_to(MongoKeyCollection::from_collection(collection))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use xmlkeys_storage::{ConfigError, StoreError, assert_configuration_order};

    use super::*;

    fn config(connection_string: &str) -> MongoKeyStoreConfig {
        MongoKeyStoreConfig::builder()
            .connection_string(connection_string)
            .database("identity")
            .collection("keys")
            .build()
            .unwrap()
    }

    // The driver connects lazily, so no server is needed to wire the builder.
    #[tokio::test]
    async fn test_persist_keys_to_mongodb_selects_backend() {
        let builder = KeyStoreBuilder::new()
            .persist_keys_to_mongodb(&config("mongodb://localhost:27017"))
            .await
            .unwrap();

        assert!(builder.has_backend());
        let repository = builder.add_key_cleanup().unwrap().build().unwrap();
        assert!(repository.is_cleanup_enabled());
    }

    #[tokio::test]
    async fn test_persist_keys_to_mongodb_from_database() {
        let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await.unwrap();
        let builder = KeyStoreBuilder::new()
            .persist_keys_to_mongodb_database(&client.database("identity"), "keys");

        assert!(builder.has_backend());
    }

    #[tokio::test]
    async fn test_unparseable_connection_string_is_config_error() {
        let result = KeyStoreBuilder::new().persist_keys_to_mongodb(&config("not a uri")).await;
        assert!(matches!(
            result,
            Err(StoreError::Config(ConfigError::Invalid { field: "connection_string", .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_deserialized_config_is_config_error() {
        let json = r#"{"connection_string": "mongodb://localhost", "database": "", "collection": "keys"}"#;
        let config: MongoKeyStoreConfig = serde_json::from_str(json).unwrap();

        let result = KeyStoreBuilder::new().persist_keys_to_mongodb(&config).await;
        assert!(matches!(result, Err(StoreError::Config(ConfigError::Empty { field: "database" }))));
    }

    #[test]
    fn test_cleanup_before_backend_is_rejected() {
        let result = KeyStoreBuilder::new().add_key_cleanup();
        assert_configuration_order!(result);
    }
}
