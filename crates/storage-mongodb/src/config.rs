//! Connection configuration for the MongoDB key collection.

use std::time::Duration;

use mongodb::{error::ErrorKind, options::ClientOptions};
use serde::{Deserialize, Serialize};
use xmlkeys_storage::ConfigError;

use crate::error::{MongoStoreError, Result};

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for selecting a server before an operation fails.
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how to reach the key collection.
///
/// Built with [`MongoKeyStoreConfig::builder`], which rejects empty names, or
/// deserialized from host configuration and checked with
/// [`validate`](Self::validate).
///
/// ```
/// use std::time::Duration;
/// use xmlkeys_storage_mongodb::MongoKeyStoreConfig;
///
/// let config = MongoKeyStoreConfig::builder()
///     .connection_string("mongodb://localhost:27017")
///     .database("identity")
///     .collection("dataProtectionKeys")
///     .connect_timeout(Duration::from_secs(5))
///     .build()?;
///
/// assert_eq!(config.collection(), "dataProtectionKeys");
/// assert_eq!(config.connect_timeout(), Duration::from_secs(5));
/// # Ok::<(), xmlkeys_storage::ConfigError>(())
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MongoKeyStoreConfig {
    pub(crate) connection_string: String,
    pub(crate) database: String,
    pub(crate) collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) app_name: Option<String>,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub(crate) connect_timeout: Duration,
    #[serde(default = "default_server_selection_timeout", with = "humantime_serde")]
    pub(crate) server_selection_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_server_selection_timeout() -> Duration {
    DEFAULT_SERVER_SELECTION_TIMEOUT
}

#[bon::bon]
impl MongoKeyStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] if the connection string, database or
    /// collection name is blank.
    #[builder]
    pub fn new(
        #[builder(into)] connection_string: String,
        #[builder(into)] database: String,
        #[builder(into)] collection: String,
        #[builder(into)] app_name: Option<String>,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default = DEFAULT_SERVER_SELECTION_TIMEOUT)] server_selection_timeout: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let config = Self {
            connection_string,
            database,
            collection,
            app_name,
            connect_timeout,
            server_selection_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the builder enforces.
    ///
    /// Deserialized configurations bypass the builder, so call this before
    /// connecting with one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] naming the first blank field.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::Empty { field: "connection_string" });
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Empty { field: "database" });
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Empty { field: "collection" });
        }
        Ok(())
    }

    /// Returns the MongoDB connection string.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the application name reported to the server, if set.
    #[must_use]
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the server selection timeout.
    #[must_use]
    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Parses the connection string and applies the configured timeouts.
    ///
    /// A connection string the driver rejects is reported as
    /// [`ConfigError::Invalid`]; other failures (such as SRV lookups) stay
    /// driver errors.
    pub(crate) async fn client_options(&self) -> Result<ClientOptions> {
        self.validate().map_err(MongoStoreError::Config)?;

        let mut options =
            ClientOptions::parse(&self.connection_string).await.map_err(|err| {
                match err.kind.as_ref() {
                    ErrorKind::InvalidArgument { message, .. } => {
                        MongoStoreError::Config(ConfigError::Invalid {
                            field: "connection_string",
                            reason: message.clone(),
                        })
                    },
                    _ => MongoStoreError::Driver(err),
                }
            })?;
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.server_selection_timeout);
        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }
        Ok(options)
    }
}

// The connection string may carry credentials.
impl std::fmt::Debug for MongoKeyStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoKeyStoreConfig")
            .field("connection_string", &"<redacted>")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("app_name", &self.app_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("server_selection_timeout", &self.server_selection_timeout)
            .finish()
    }
}
