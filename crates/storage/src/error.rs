//! Key store error types and result alias.
//!
//! Every operation in this crate (and in backend crates built on it) reports
//! failures through [`StoreError`]. Backends map their driver errors onto
//! these variants at the crate boundary.
//!
//! # Error Types
//!
//! - [`StoreError::StorageUnavailable`] - The collection could not be reached
//! - [`StoreError::MalformedPayload`] - A stored payload is not well-formed XML
//! - [`StoreError::ConfigurationOrder`] - Setup steps were applied out of order
//! - [`StoreError::AuthorityUnavailable`] - The key authority could not be resolved
//! - [`StoreError::Conflict`] - A record with the same storage id already exists
//! - [`StoreError::Config`] - Invalid configuration values
//! - [`StoreError::Internal`] - Backend-specific internal errors
//!
//! None of these are retried inside this crate. Retry and backoff belong to
//! the storage driver or the caller.
//!
//! # Example
//!
//! ```
//! use xmlkeys_storage::{StoreError, StoreResult};
//!
//! fn load(payload: &str) -> StoreResult<()> {
//!     Err(StoreError::malformed_payload(format!("cannot parse {payload:?}")))
//! }
//!
//! assert!(matches!(load("not xml"), Err(StoreError::MalformedPayload { .. })));
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for key store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while storing, reading or cleaning up key records.
///
/// Errors preserve their source chain via the `#[source]` attribute so the
/// underlying driver or parser error stays visible to callers.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The underlying collection could not be reached.
    ///
    /// Covers connection refusal, DNS failures, server selection timeouts
    /// and any other transport-level failure reported by the driver.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        /// Description of the failure.
        message: String,
        /// The underlying error reported by the driver.
        #[source]
        source: Option<BoxError>,
    },

    /// A stored payload could not be parsed back into an XML element.
    ///
    /// Fatal to the containing operation: reads never skip a bad record.
    #[error("Malformed payload: {message}")]
    MalformedPayload {
        /// Description of the parse failure.
        message: String,
        /// The underlying parser error.
        #[source]
        source: Option<BoxError>,
    },

    /// A setup step was applied before the step it depends on.
    ///
    /// Raised at wiring time only, e.g. enabling key cleanup before a
    /// persistence backend was selected.
    #[error("Configuration order error: {message}")]
    ConfigurationOrder {
        /// Which step was applied out of order.
        message: String,
    },

    /// The key authority needed for cleanup could not be resolved.
    #[error("Key authority unavailable: {message}")]
    AuthorityUnavailable {
        /// Why the authority could not be resolved.
        message: String,
    },

    /// A record with the same storage id already exists.
    #[error("Record already exists: {id}")]
    Conflict {
        /// The conflicting storage id.
        id: String,
    },

    /// A configuration value failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Internal backend error.
    ///
    /// Catch-all for backend-specific errors that don't fit other categories.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a new `StorageUnavailable` error with the given message.
    #[must_use]
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable { message: message.into(), source: None }
    }

    /// Creates a new `StorageUnavailable` error with a message and source error.
    #[must_use]
    pub fn storage_unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StorageUnavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `MalformedPayload` error with the given message.
    #[must_use]
    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::MalformedPayload { message: message.into(), source: None }
    }

    /// Creates a new `MalformedPayload` error with a message and source error.
    #[must_use]
    pub fn malformed_payload_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MalformedPayload { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `ConfigurationOrder` error.
    #[must_use]
    pub fn configuration_order(message: impl Into<String>) -> Self {
        Self::ConfigurationOrder { message: message.into() }
    }

    /// Creates a new `AuthorityUnavailable` error.
    #[must_use]
    pub fn authority_unavailable(message: impl Into<String>) -> Self {
        Self::AuthorityUnavailable { message: message.into() }
    }

    /// Creates a new `Conflict` error for the given storage id.
    #[must_use]
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }
}

/// Configuration validation errors.
///
/// Returned by option and connection-config constructors when a field holds
/// a value the store cannot work with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required string field is empty.
    #[error("`{field}` must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A field holds a value outside its accepted set.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
