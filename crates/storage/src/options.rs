//! Repository options.
//!
//! [`KeyRepositoryOptions`] replaces the family of "configure the store"
//! overloads with one validated struct, constructed once and then fixed for
//! the repository's lifetime. It can be built in code (bon builder) or
//! deserialized from host configuration.
//!
//! ```
//! use xmlkeys_storage::{KeyRepositoryOptions, UnidentifiedRecords};
//!
//! let options = KeyRepositoryOptions::builder()
//!     .cleanup_enabled(true)
//!     .unidentified_records(UnidentifiedRecords::Retain)
//!     .build()?;
//! assert_eq!(options.key_id_attribute(), "id");
//!
//! let from_config: KeyRepositoryOptions =
//!     serde_json::from_str(r#"{ "cleanup_enabled": true }"#).unwrap();
//! assert!(from_config.cleanup_enabled());
//! # Ok::<(), xmlkeys_storage::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, record::DEFAULT_KEY_ID_ATTRIBUTE};

/// What cleanup does with records that carry no key id.
///
/// Such records are never in the authority's valid set. Legacy documents
/// written before key ids were extracted, and revocation elements, fall in
/// this category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnidentifiedRecords {
    /// Delete them along with every other record not known to be valid.
    #[default]
    Remove,
    /// Keep them; only identified records are ever deleted.
    Retain,
}

/// Options fixed at repository construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyRepositoryOptions {
    /// Whether cleanup runs on every store from the start.
    #[serde(default)]
    pub(crate) cleanup_enabled: bool,

    /// Root attribute the key id is read from.
    #[serde(default = "default_key_id_attribute")]
    pub(crate) key_id_attribute: String,

    /// Treatment of records without a key id during cleanup.
    #[serde(default)]
    pub(crate) unidentified_records: UnidentifiedRecords,
}

fn default_key_id_attribute() -> String {
    DEFAULT_KEY_ID_ATTRIBUTE.to_owned()
}

impl Default for KeyRepositoryOptions {
    fn default() -> Self {
        Self {
            cleanup_enabled: false,
            key_id_attribute: default_key_id_attribute(),
            unidentified_records: UnidentifiedRecords::default(),
        }
    }
}

#[bon::bon]
impl KeyRepositoryOptions {
    /// Creates validated options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] if `key_id_attribute` is empty.
    #[builder]
    pub fn new(
        #[builder(default)] cleanup_enabled: bool,
        #[builder(into, default = default_key_id_attribute())] key_id_attribute: String,
        #[builder(default)] unidentified_records: UnidentifiedRecords,
    ) -> Result<Self, ConfigError> {
        let options = Self { cleanup_enabled, key_id_attribute, unidentified_records };
        options.validate()?;
        Ok(options)
    }
}

impl KeyRepositoryOptions {
    /// Checks values that deserialization alone cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] if `key_id_attribute` is empty or blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_id_attribute.trim().is_empty() {
            return Err(ConfigError::Empty { field: "key_id_attribute" });
        }
        Ok(())
    }

    /// Whether cleanup starts enabled.
    #[must_use]
    pub fn cleanup_enabled(&self) -> bool {
        self.cleanup_enabled
    }

    /// Root attribute the key id is read from.
    #[must_use]
    pub fn key_id_attribute(&self) -> &str {
        &self.key_id_attribute
    }

    /// Treatment of records without a key id.
    #[must_use]
    pub fn unidentified_records(&self) -> UnidentifiedRecords {
        self.unidentified_records
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = KeyRepositoryOptions::builder().build().unwrap();
        assert_eq!(options, KeyRepositoryOptions::default());
        assert!(!options.cleanup_enabled());
        assert_eq!(options.key_id_attribute(), "id");
        assert_eq!(options.unidentified_records(), UnidentifiedRecords::Remove);
    }

    #[test]
    fn empty_attribute_is_rejected() {
        let result = KeyRepositoryOptions::builder().key_id_attribute(" ").build();
        assert_eq!(result, Err(ConfigError::Empty { field: "key_id_attribute" }));
    }

    #[test]
    fn deserializes_with_defaults() {
        let options: KeyRepositoryOptions =
            serde_json::from_str(r#"{ "unidentified_records": "retain" }"#).unwrap();
        assert!(!options.cleanup_enabled());
        assert_eq!(options.key_id_attribute(), "id");
        assert_eq!(options.unidentified_records(), UnidentifiedRecords::Retain);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<KeyRepositoryOptions>(r#"{ "cleanup": true }"#);
        assert!(result.is_err());
    }
}
