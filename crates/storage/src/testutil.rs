//! Shared test utilities for key store testing.
//!
//! Provides sample key XML, element generators, an in-memory key manager that
//! plays the key authority, and assertion macros for [`StoreResult`] values.
//! Feature-gated behind `testutil` so none of it reaches production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! xmlkeys-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use xmlkeys_storage::testutil::{MemoryKeyManager, SAMPLE_KEY_XML, key_element};
//! ```

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::{
    authority::{KeyAuthority, KeyDescriptor},
    collection::{KeyCollection, RecordFilter},
    error::{StoreError, StoreResult},
    repository::KeyRepository,
    xml::XmlElement,
};

/// Key id of [`SAMPLE_KEY_XML`].
pub const SAMPLE_KEY_ID: &str = "3e44a364-9c6c-4b30-8c79-8ecfca124943";

/// A never-expiring data protection key, in compact form.
pub const SAMPLE_KEY_XML: &str = concat!(
    r#"<key id="3e44a364-9c6c-4b30-8c79-8ecfca124943" version="1">"#,
    "<creationDate>2018-04-12T15:15:54.9879433Z</creationDate>",
    "<activationDate>2018-04-12T15:15:54.805328Z</activationDate>",
    "<expirationDate>9999-12-31T00:00:00.00Z</expirationDate>",
    r#"<descriptor deserializerType="Microsoft.AspNetCore.DataProtection.AuthenticatedEncryption.ConfigurationModel.AuthenticatedEncryptorDescriptorDeserializer, Microsoft.AspNetCore.DataProtection, Version=2.0.2.0, Culture=neutral, PublicKeyToken=adb9793829ddae60">"#,
    r#"<descriptor><encryption algorithm="AES_256_CBC"/><validation algorithm="HMACSHA256"/>"#,
    r#"<masterKey p4:requiresEncryption="true" xmlns:p4="http://schemas.asp.net/2015/03/dataProtection">"#,
    "<!-- Warning: the key below is in an unencrypted form. -->",
    "<value>cBH6uO232L1JDUAX1VeFu+xBDd2uUqAv26pUA8fMtEpKN5PlVunICbq2uKEkmWirHoXgc1g1afojJ7hYoKJiiw==</value>",
    "</masterKey></descriptor></descriptor></key>",
);

/// Key id of [`EXPIRED_KEY_XML`].
pub const EXPIRED_KEY_ID: &str = "53a942d0-e8bf-4dab-983a-249f6e487f7d";

/// A key that expired in 2017.
pub const EXPIRED_KEY_XML: &str = concat!(
    r#"<key id="53a942d0-e8bf-4dab-983a-249f6e487f7d" version="1">"#,
    "<creationDate>2017-04-12T15:15:54.9879433Z</creationDate>",
    "<activationDate>2017-04-12T15:15:54.805328Z</activationDate>",
    "<expirationDate>2017-07-11T15:15:54.805328Z</expirationDate>",
    r#"<descriptor><encryption algorithm="AES_256_CBC"/><validation algorithm="HMACSHA256"/>"#,
    "<masterKey><value>cBH6uO232L1JDUAX1VeFu+xBDd2uUqAv26pUA8fMtEpKN5PlVunICbq2uKEkmWirHoXgc1g1afojJ7hYoKJiiw==</value></masterKey>",
    "</descriptor></key>",
);

/// Revocation target meaning "every key created up to the revocation date".
pub const REVOKE_ALL: &str = "*";

fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Builds a key element in the shape the host key manager writes.
#[must_use]
pub fn key_element(
    key_id: &str,
    creation: DateTime<Utc>,
    activation: DateTime<Utc>,
    expiration: DateTime<Utc>,
) -> XmlElement {
    let master_key = XmlElement::new("masterKey")
        .with_comment(" Warning: the key below is in an unencrypted form. ")
        .with_child(XmlElement::new("value").with_text(Uuid::new_v4().simple().to_string()));

    XmlElement::new("key")
        .with_attribute("id", key_id)
        .with_attribute("version", "1")
        .with_child(XmlElement::new("creationDate").with_text(format_date(creation)))
        .with_child(XmlElement::new("activationDate").with_text(format_date(activation)))
        .with_child(XmlElement::new("expirationDate").with_text(format_date(expiration)))
        .with_child(
            XmlElement::new("descriptor").with_child(
                XmlElement::new("descriptor")
                    .with_child(XmlElement::new("encryption").with_attribute("algorithm", "AES_256_CBC"))
                    .with_child(XmlElement::new("validation").with_attribute("algorithm", "HMACSHA256"))
                    .with_child(master_key),
            ),
        )
}

/// Builds a revocation element for one key id, or [`REVOKE_ALL`].
#[must_use]
pub fn revocation_element(
    target: &str,
    revocation_date: DateTime<Utc>,
    reason: Option<&str>,
) -> XmlElement {
    let element = XmlElement::new("revocation")
        .with_attribute("version", "1")
        .with_child(XmlElement::new("revocationDate").with_text(format_date(revocation_date)))
        .with_child(XmlElement::new("key").with_attribute("id", target));
    match reason {
        Some(reason) => element.with_child(XmlElement::new("reason").with_text(reason)),
        None => element,
    }
}

/// Key ids of every record in a collection that has one.
///
/// # Panics
///
/// Panics if the collection cannot be read.
pub async fn stored_key_ids<C: KeyCollection + ?Sized>(collection: &C) -> BTreeSet<String> {
    collection
        .find(&RecordFilter::All)
        .await
        .expect("collection should be readable")
        .iter()
        .filter_map(|record| record.key_id().map(str::to_owned))
        .collect()
}

/// Key manager that keeps its keys in the repository it cleans.
///
/// Keys and revocations are written as XML elements through
/// [`KeyRepository::store_element`]; [`get_all_keys`](KeyAuthority::get_all_keys)
/// reads the repository back and derives validity from them. The manager
/// owns the repository while the repository reaches the manager through its
/// resolver, so it exercises the same circular wiring as a real host.
#[derive(Debug)]
pub struct MemoryKeyManager {
    repository: Arc<KeyRepository>,
}

impl MemoryKeyManager {
    /// Creates a manager on top of a repository.
    #[must_use]
    pub fn new(repository: Arc<KeyRepository>) -> Self {
        Self { repository }
    }

    /// The repository keys are stored in.
    #[must_use]
    pub fn repository(&self) -> &Arc<KeyRepository> {
        &self.repository
    }

    /// Creates and stores a new key, returning its id.
    ///
    /// # Errors
    ///
    /// Returns the repository's error if the key cannot be stored.
    pub async fn create_new_key(
        &self,
        activation: DateTime<Utc>,
        expiration: DateTime<Utc>,
    ) -> StoreResult<String> {
        let key_id = Uuid::new_v4().to_string();
        let element = key_element(&key_id, Utc::now(), activation, expiration);
        self.repository.store_element(&element, Some(&format!("key-{key_id}"))).await?;
        Ok(key_id)
    }

    /// Stores a revocation for one key.
    ///
    /// # Errors
    ///
    /// Returns the repository's error if the revocation cannot be stored.
    pub async fn revoke_key(&self, key_id: &str, reason: Option<&str>) -> StoreResult<()> {
        let element = revocation_element(key_id, Utc::now(), reason);
        self.repository.store_element(&element, Some(&format!("revocation-{key_id}"))).await?;
        Ok(())
    }

    /// Revokes every key created at or before `revocation_date`.
    ///
    /// # Errors
    ///
    /// Returns the repository's error if the revocation cannot be stored.
    pub async fn revoke_all_keys(
        &self,
        revocation_date: DateTime<Utc>,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        let element = revocation_element(REVOKE_ALL, revocation_date, reason);
        let friendly_name = format!("revocation-{}", revocation_date.timestamp());
        self.repository.store_element(&element, Some(&friendly_name)).await?;
        Ok(())
    }
}

fn child_date(element: &XmlElement, name: &str) -> StoreResult<DateTime<Utc>> {
    let text = element
        .child(name)
        .map(XmlElement::text)
        .ok_or_else(|| StoreError::malformed_payload(format!("<{}> has no <{name}>", element.name())))?;
    DateTime::parse_from_rfc3339(&text)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| StoreError::malformed_payload_with_source(format!("invalid <{name}> {text:?}"), e))
}

#[async_trait]
impl KeyAuthority for MemoryKeyManager {
    async fn get_all_keys(&self) -> StoreResult<Vec<KeyDescriptor>> {
        let elements = self.repository.get_all_elements().await?;

        let mut keys = Vec::new();
        let mut revoked_ids = HashSet::new();
        let mut revoked_until: Option<DateTime<Utc>> = None;

        for element in &elements {
            match element.name() {
                "key" => {
                    let key_id = element
                        .attribute("id")
                        .ok_or_else(|| StoreError::malformed_payload("<key> has no id attribute"))?;
                    let created = child_date(element, "creationDate")?;
                    let expires_at = child_date(element, "expirationDate")?;
                    keys.push((KeyDescriptor::new(key_id, expires_at), created));
                },
                "revocation" => {
                    let target = element
                        .child("key")
                        .and_then(|key| key.attribute("id"))
                        .ok_or_else(|| StoreError::malformed_payload("<revocation> has no target"))?;
                    if target == REVOKE_ALL {
                        let date = child_date(element, "revocationDate")?;
                        revoked_until = revoked_until.max(Some(date));
                    } else {
                        revoked_ids.insert(target.to_owned());
                    }
                },
                _ => {},
            }
        }

        Ok(keys
            .into_iter()
            .map(|(descriptor, created)| {
                let revoked = revoked_ids.contains(&descriptor.key_id)
                    || revoked_until.is_some_and(|until| created <= until);
                if revoked { descriptor.revoked() } else { descriptor }
            })
            .collect())
    }
}

/// Assert that a [`StoreResult`] is a [`StoreError::MalformedPayload`].
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use xmlkeys_storage::{StoreError, StoreResult, assert_malformed_payload};
///
/// let result: StoreResult<()> = Err(StoreError::malformed_payload("not xml"));
/// assert_malformed_payload!(result);
/// ```
#[macro_export]
macro_rules! assert_malformed_payload {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StoreError::MalformedPayload { .. })),
            "expected StoreError::MalformedPayload, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StoreError::MalformedPayload { .. })),
            "{}: expected StoreError::MalformedPayload, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StoreResult`] is a [`StoreError::ConfigurationOrder`].
#[macro_export]
macro_rules! assert_configuration_order {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StoreError::ConfigurationOrder { .. })),
            "expected StoreError::ConfigurationOrder, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StoreResult`] is a [`StoreError::StorageUnavailable`].
#[macro_export]
macro_rules! assert_storage_unavailable {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StoreError::StorageUnavailable { .. })),
            "expected StoreError::StorageUnavailable, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StoreResult`] is a [`StoreError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StoreError::Conflict { .. })),
            "expected StoreError::Conflict, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StoreResult`] is `Ok` and return the value.
#[macro_export]
macro_rules! assert_store_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StoreError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StoreError: {e:?}", $msg),
        }
    };
}
