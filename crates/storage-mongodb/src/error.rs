//! Error types for the MongoDB key collection.
//!
//! Driver errors are classified here and converted to [`StoreError`] so the
//! repository only ever sees the storage error model.

use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;
use xmlkeys_storage::{ConfigError, StoreError};

/// Server error code for a unique index violation.
pub(crate) const DUPLICATE_KEY_CODE: i32 = 11000;

/// Result type for MongoDB backend operations.
pub type Result<T> = std::result::Result<T, MongoStoreError>;

/// Errors specific to the MongoDB key collection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MongoStoreError {
    /// Error reported by the MongoDB driver.
    #[error("MongoDB error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Invalid connection configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A record id that is not a valid `ObjectId`.
    #[error("invalid record id {id:?}: {source}")]
    InvalidRecordId {
        /// The offending id.
        id: String,
        /// Parse failure.
        #[source]
        source: mongodb::bson::oid::Error,
    },
}

impl From<MongoStoreError> for StoreError {
    fn from(err: MongoStoreError) -> Self {
        match err {
            MongoStoreError::Driver(err) => driver_error_to_store_error(err),
            MongoStoreError::Config(err) => StoreError::Config(err),
            err @ MongoStoreError::InvalidRecordId { .. } => {
                StoreError::internal_with_source("record id cannot be used as a MongoDB _id", err)
            },
        }
    }
}

/// Returns `true` if the error is a unique index violation on write.
pub(crate) fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}

/// Maps a driver error to the storage error model.
///
/// | Driver error | Storage error |
/// |--------------|---------------|
/// | BSON decode failure | `MalformedPayload` |
/// | Duplicate key (11000) | `Conflict` |
/// | Invalid argument, BSON encode failure | `Internal` |
/// | Anything else (network, selection, auth, server) | `StorageUnavailable` |
fn driver_error_to_store_error(err: mongodb::error::Error) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::BsonDeserialization(_) => {
            StoreError::malformed_payload_with_source("stored key document could not be decoded", err)
        },
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE => {
            StoreError::conflict(write.message.clone())
        },
        ErrorKind::InvalidArgument { .. } | ErrorKind::BsonSerialization(_) => {
            StoreError::internal_with_source("MongoDB rejected the request", err)
        },
        _ => {
            tracing::warn!(error = %err, "MongoDB operation failed");
            StoreError::storage_unavailable_with_source("MongoDB operation failed", err)
        },
    }
}
