//! Common types shared by collections and the repository.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity assigned to a key record by the storage layer on insert.
///
/// The repository never interprets it: the in-memory collection hands out
/// sequence numbers, the MongoDB collection hands out hex-encoded object ids.
///
/// # Examples
///
/// ```
/// use xmlkeys_storage::RecordId;
///
/// let id = RecordId::from("65f1c0ffee");
/// assert_eq!(id.as_str(), "65f1c0ffee");
/// assert_eq!(id.to_string(), "65f1c0ffee");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id and returns the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
