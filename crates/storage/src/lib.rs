//! Key-ring persistence for XML key elements.
//!
//! This crate stores data protection keys (XML elements produced by a host
//! key manager) in a document collection and removes keys the key manager
//! no longer considers valid.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Host key manager (KeyAuthority)             │
//! │        creates / revokes keys, reports their validity       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       KeyRepository                         │
//! │   store_element │ get_all_elements │ remove_stale_records   │
//! ├─────────────────────────────────────────────────────────────┤
//! │            KeyRecord  (payload + extracted key id)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  KeyCollection trait                        │
//! │           (insert_one, find, delete_many)                   │
//! ├──────────────────────┬──────────────────────────────────────┤
//! │ MemoryKeyCollection  │  MongoKeyCollection                  │
//! │      (testing)       │  (in `xmlkeys-storage-mongodb`)      │
//! └──────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! The key manager depends on the repository to store its keys, and the
//! repository needs the key manager to decide what to clean up. The
//! repository therefore takes an [`AuthorityResolver`] and only calls it when
//! cleanup runs; [`AuthoritySlot`] closes the loop once the manager exists.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use xmlkeys_storage::{KeyStoreBuilder, MemoryKeyCollection, testutil::MemoryKeyManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = KeyStoreBuilder::new().persist_keys_to(MemoryKeyCollection::new()).add_key_cleanup()?;
//!     let slot = builder.authority_slot();
//!     let repository = Arc::new(builder.build()?);
//!
//!     let manager = Arc::new(MemoryKeyManager::new(Arc::clone(&repository)));
//!     slot.register(&manager)?;
//!
//!     let now = Utc::now();
//!     let old = manager.create_new_key(now, now + Duration::days(90)).await?;
//!     manager.revoke_key(&old, Some("rotated")).await?;
//!     manager.create_new_key(now, now + Duration::days(90)).await?;
//!
//!     // The revoked key was cleaned up; the new key and the revocation remain.
//!     assert_eq!(repository.get_all_elements().await?.len(), 2);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StoreResult<T>`]. Nothing is retried here;
//! retries belong to the storage driver or the caller.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (sample keys, an in-memory key manager,
//!   assertion macros) and the `conformance` suite for collection implementations.
//! - **`failpoints`**: Enables fail-point injection in [`MemoryKeyCollection`].

#![deny(unsafe_code)]

pub mod authority;
pub mod builder;
pub mod collection;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
pub mod options;
pub mod record;
pub mod repository;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;
pub mod xml;

// Re-export primary types at crate root for convenience
pub use authority::{AuthorityResolver, AuthoritySlot, KeyAuthority, KeyDescriptor, fixed_resolver};
pub use builder::KeyStoreBuilder;
pub use collection::{KeyCollection, RecordFilter};
pub use error::{BoxError, ConfigError, StoreError, StoreResult};
pub use memory::MemoryKeyCollection;
pub use options::{KeyRepositoryOptions, UnidentifiedRecords};
pub use record::{DEFAULT_KEY_ID_ATTRIBUTE, KeyRecord};
pub use repository::{KeyRepository, StoreOutcome};
pub use types::RecordId;
pub use xml::{XmlElement, XmlNode};
pub use zeroize::Zeroizing;
