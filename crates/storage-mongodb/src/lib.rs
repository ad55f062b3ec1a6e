//! MongoDB persistence for the `xmlkeys-storage` key repository.
//!
//! This crate provides [`MongoKeyCollection`], a
//! [`KeyCollection`](xmlkeys_storage::KeyCollection) that stores key records
//! as documents in a MongoDB collection, and [`MongoKeyStoreBuilderExt`],
//! which lets a host select it on [`KeyStoreBuilder`](xmlkeys_storage::KeyStoreBuilder).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       KeyRepository                         │
//! │   store_element │ get_all_elements │ remove_stale_records   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    MongoKeyCollection                       │
//! │          (implements KeyCollection trait)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    MongoDB driver                           │
//! │      Client │ Collection<KeyDocument> │ connection pool     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! // Requires a running MongoDB server.
//! use xmlkeys_storage::{KeyStoreBuilder, XmlElement};
//! use xmlkeys_storage_mongodb::{MongoKeyStoreBuilderExt, MongoKeyStoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MongoKeyStoreConfig::builder()
//!         .connection_string("mongodb://localhost:27017")
//!         .database("identity")
//!         .collection("dataProtectionKeys")
//!         .app_name("key-ring")
//!         .build()?;
//!
//!     let repository = KeyStoreBuilder::new().persist_keys_to_mongodb(&config).await?.build()?;
//!
//!     let key = XmlElement::new("key").with_attribute("id", "2b8e5f4c-3a8e-4a6e-9c0e-0f6c1d5c7a11");
//!     repository.store_element(&key, None).await?;
//!     let keys = repository.get_all_elements().await?;
//!     println!("{} keys stored", keys.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Document Mapping
//!
//! | KeyRecord | MongoDB document |
//! |-----------|------------------|
//! | `id` | `_id` (`ObjectId`, hex-encoded in [`RecordId`](xmlkeys_storage::RecordId)) |
//! | `payload` | `key` (also read from `Key`) |
//! | `key_id` | `keyId` (also read from `KeyId`; absent when `None`) |
//!
//! Filters query both key id field names:
//!
//! | RecordFilter | Query |
//! |--------------|-------|
//! | `All` | `{}` |
//! | `KeyIdEquals(k)` | `{ $or: [{ keyId: k }, { KeyId: k }] }` |
//! | `KeyIdNotIn { ids, include_unidentified: true }` | `{ $nor: [{ keyId: { $in: ids } }, { KeyId: { $in: ids } }] }` |
//! | `KeyIdNotIn { ids, include_unidentified: false }` | the above, plus `$or: [{ keyId: { $type: "string" } }, { KeyId: { $type: "string" } }]` |
//!
//! # Error Mapping
//!
//! Driver errors become [`StoreError`](xmlkeys_storage::StoreError): undecodable
//! documents are `MalformedPayload`, duplicate `_id` inserts are `Conflict`, and
//! transport or server failures are `StorageUnavailable`. See [`MongoStoreError`].

#![deny(unsafe_code)]

pub mod builder;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;

pub use builder::MongoKeyStoreBuilderExt;
pub use collection::MongoKeyCollection;
pub use config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SERVER_SELECTION_TIMEOUT, MongoKeyStoreConfig};
pub use document::{KEY_ID_FIELD, KeyDocument, LEGACY_KEY_ID_FIELD, filter_document};
pub use error::{MongoStoreError, Result};
