//! BSON layout of a stored key and translation of record filters.
//!
//! A key is stored as `{ _id: ObjectId, key: <xml string>, keyId: <string> }`.
//! `keyId` is absent for records that carry no key id (revocations, documents
//! written before the field existed). Documents written with capitalized
//! field names (`Key`, `KeyId`) are read as well.

use mongodb::bson::{Document, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use xmlkeys_storage::{KeyRecord, RecordFilter, RecordId};
use zeroize::Zeroizing;

use crate::error::MongoStoreError;

/// Name of the key id field.
pub const KEY_ID_FIELD: &str = "keyId";

/// Key id field name used by earlier deployments.
pub const LEGACY_KEY_ID_FIELD: &str = "KeyId";

/// A key record as stored in MongoDB.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyDocument {
    /// Server-assigned document id.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Serialized XML key element.
    #[serde(alias = "Key")]
    pub key: Zeroizing<String>,

    /// Key id, when the element has one.
    #[serde(rename = "keyId", alias = "KeyId", default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl std::fmt::Debug for KeyDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDocument")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl TryFrom<&KeyRecord> for KeyDocument {
    type Error = MongoStoreError;

    fn try_from(record: &KeyRecord) -> Result<Self, Self::Error> {
        let id = record
            .id()
            .map(|id| {
                ObjectId::parse_str(id.as_str()).map_err(|source| {
                    MongoStoreError::InvalidRecordId { id: id.as_str().to_owned(), source }
                })
            })
            .transpose()?;

        Ok(Self {
            id,
            key: Zeroizing::new(record.payload().to_owned()),
            key_id: record.key_id().map(str::to_owned),
        })
    }
}

impl From<KeyDocument> for KeyRecord {
    fn from(mut document: KeyDocument) -> Self {
        let payload = std::mem::take(&mut *document.key);
        let record = KeyRecord::from_raw(payload, document.key_id.take());
        match document.id {
            Some(id) => record.with_id(RecordId::from(id.to_hex())),
            None => record,
        }
    }
}

/// Translates a record filter into a MongoDB query document.
///
/// Every predicate looks at both [`KEY_ID_FIELD`] and [`LEGACY_KEY_ID_FIELD`],
/// so documents written by earlier deployments match exactly as they decode.
/// `KeyIdNotIn` without `include_unidentified` also requires a string key id
/// in one of the two fields; `$nor` alone would match documents with a
/// missing or null key id.
#[must_use]
pub fn filter_document(filter: &RecordFilter) -> Document {
    match filter {
        RecordFilter::All => doc! {},
        RecordFilter::KeyIdEquals(key_id) => doc! {
            "$or": [
                { KEY_ID_FIELD: key_id.as_str() },
                { LEGACY_KEY_ID_FIELD: key_id.as_str() }
            ]
        },
        RecordFilter::KeyIdNotIn { key_ids, include_unidentified } => {
            let key_ids: Vec<&str> = key_ids.iter().map(String::as_str).collect();
            let mut filter = doc! {
                "$nor": [
                    { KEY_ID_FIELD: { "$in": key_ids.clone() } },
                    { LEGACY_KEY_ID_FIELD: { "$in": key_ids } }
                ]
            };
            if !*include_unidentified {
                filter.insert(
                    "$or",
                    vec![
                        doc! { KEY_ID_FIELD: { "$type": "string" } },
                        doc! { LEGACY_KEY_ID_FIELD: { "$type": "string" } },
                    ],
                );
            }
            filter
        },
    }
}
