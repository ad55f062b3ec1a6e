//! Key record model: the stored form of one key.
//!
//! A [`KeyRecord`] is the opaque serialized XML payload plus the key id
//! extracted from the root element at write time. The key id is only used
//! for filtering during cleanup and is never re-derived from the payload on
//! read.
//!
//! Records are created once and never updated; they disappear only through
//! cleanup or external bulk deletion.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::StoreResult,
    types::RecordId,
    xml::XmlElement,
};

/// Root attribute holding the key id when nothing else is configured.
pub const DEFAULT_KEY_ID_ATTRIBUTE: &str = "id";

/// One stored key.
///
/// The payload is key material and is wiped from memory on drop.
///
/// # Serialized layout
///
/// ```json
/// { "id": "<storage id>", "key": "<serialized XML>", "keyId": "<key id>" }
/// ```
///
/// `id` and `keyId` are omitted when absent. Documents written before the
/// key id was extracted deserialize with `key_id == None`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RecordId>,
    #[serde(rename = "key")]
    payload: Zeroizing<String>,
    #[serde(rename = "keyId", default, skip_serializing_if = "Option::is_none")]
    key_id: Option<String>,
}

impl KeyRecord {
    /// Builds a record from a key element, reading the key id from `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`](crate::StoreError::Internal) if the
    /// element cannot be serialized.
    ///
    /// # Example
    ///
    /// ```
    /// use xmlkeys_storage::{KeyRecord, XmlElement};
    ///
    /// let element = XmlElement::new("key").with_attribute("id", "k1");
    /// let record = KeyRecord::from_element(&element)?;
    /// assert_eq!(record.key_id(), Some("k1"));
    /// assert_eq!(record.payload(), r#"<key id="k1"/>"#);
    /// # Ok::<(), xmlkeys_storage::StoreError>(())
    /// ```
    pub fn from_element(element: &XmlElement) -> StoreResult<Self> {
        Self::from_element_with_id_attribute(element, DEFAULT_KEY_ID_ATTRIBUTE)
    }

    /// Builds a record from a key element, reading the key id from the
    /// given root attribute. An empty attribute value counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`](crate::StoreError::Internal) if the
    /// element cannot be serialized.
    pub fn from_element_with_id_attribute(
        element: &XmlElement,
        id_attribute: &str,
    ) -> StoreResult<Self> {
        let payload = element.to_compact_string()?;
        let key_id = element.attribute(id_attribute).map(str::to_owned);
        Ok(Self::from_raw(payload, key_id))
    }

    /// Builds a record verbatim, without parsing the payload.
    ///
    /// Used for seeding and for documents read back from a backend.
    #[must_use]
    pub fn from_raw(payload: impl Into<String>, key_id: Option<String>) -> Self {
        Self {
            id: None,
            payload: Zeroizing::new(payload.into()),
            key_id: key_id.filter(|id| !id.is_empty()),
        }
    }

    /// Attaches the storage id assigned by a collection.
    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    /// Parses the payload back into a key element.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MalformedPayload`](crate::StoreError::MalformedPayload)
    /// if the payload is not well-formed XML.
    pub fn to_element(&self) -> StoreResult<XmlElement> {
        XmlElement::parse(&self.payload)
    }

    /// Storage id, once the record has been inserted.
    #[must_use]
    pub fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    /// Serialized XML payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Key id extracted at write time.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("payload", &format_args!("[{} bytes]", self.payload.len()))
            .field("key_id", &self.key_id)
            .finish()
    }
}
