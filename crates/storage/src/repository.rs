//! Key repository: store, retrieve and clean up key records.
//!
//! [`KeyRepository`] is what the host's key manager talks to. It turns key
//! elements into [`KeyRecord`]s, persists them in a [`KeyCollection`], reads
//! them all back, and (once cleanup is enabled) deletes records the key
//! authority no longer considers valid.
//!
//! # Cleanup
//!
//! Cleanup is opt-in and runs opportunistically after each successful store;
//! there is no background task and it is never tied to drop. One pass is:
//!
//! 1. Resolve the authority through the [`AuthorityResolver`]
//! 2. Read every key descriptor and take a single UTC clock reading
//! 3. Issue one `delete_many` for records whose key id is not valid at that instant
//!
//! Records without a key id (revocations, legacy records) are deleted too,
//! unless [`UnidentifiedRecords::Retain`] is configured.
//!
//! # Race window
//!
//! Cleanup runs after the insert. An authority that reads its keys from this
//! same store always sees the new key, so it cannot be deleted by its own
//! store. Another process cleaning up between a peer's insert and the peer's
//! authority learning about that key can delete it. No locks are taken and
//! no operation is retried.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;

use crate::{
    authority::AuthorityResolver,
    collection::{KeyCollection, RecordFilter},
    error::{StoreError, StoreResult},
    options::{KeyRepositoryOptions, UnidentifiedRecords},
    record::KeyRecord,
    types::RecordId,
    xml::XmlElement,
};

/// What [`KeyRepository::store_element_with_outcome`] did.
#[derive(Debug)]
#[must_use]
pub struct StoreOutcome {
    /// Storage id of the inserted record.
    pub id: RecordId,

    /// Result of the cleanup pass that followed the insert, `None` when
    /// cleanup is disabled.
    pub cleanup: Option<StoreResult<u64>>,
}

impl StoreOutcome {
    /// The cleanup error, if the pass ran and failed.
    #[must_use]
    pub fn cleanup_error(&self) -> Option<&StoreError> {
        self.cleanup.as_ref().and_then(|result| result.as_ref().err())
    }
}

/// Durable key store with authority-driven cleanup.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use xmlkeys_storage::{AuthoritySlot, KeyRepository, MemoryKeyCollection, XmlElement};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let slot = AuthoritySlot::new();
/// let repository = KeyRepository::new(Arc::new(MemoryKeyCollection::new()), slot.resolver());
///
/// let key = XmlElement::new("key").with_attribute("id", "k1");
/// repository.store_element(&key, None).await.unwrap();
///
/// assert_eq!(repository.get_all_elements().await.unwrap(), vec![key]);
/// # });
/// ```
pub struct KeyRepository {
    collection: Arc<dyn KeyCollection>,
    authority: AuthorityResolver,
    options: KeyRepositoryOptions,
    cleanup_enabled: AtomicBool,
}

impl KeyRepository {
    /// Creates a repository with default options (cleanup disabled).
    #[must_use]
    pub fn new(collection: Arc<dyn KeyCollection>, authority: AuthorityResolver) -> Self {
        Self::from_parts(collection, authority, KeyRepositoryOptions::default())
    }

    /// Creates a repository with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`](crate::StoreError::Config) if the
    /// options fail validation.
    pub fn with_options(
        collection: Arc<dyn KeyCollection>,
        authority: AuthorityResolver,
        options: KeyRepositoryOptions,
    ) -> StoreResult<Self> {
        options.validate()?;
        Ok(Self::from_parts(collection, authority, options))
    }

    fn from_parts(
        collection: Arc<dyn KeyCollection>,
        authority: AuthorityResolver,
        options: KeyRepositoryOptions,
    ) -> Self {
        let cleanup_enabled = AtomicBool::new(options.cleanup_enabled);
        Self { collection, authority, options, cleanup_enabled }
    }

    /// Options the repository was built with.
    #[must_use]
    pub fn options(&self) -> &KeyRepositoryOptions {
        &self.options
    }

    /// Turns on cleanup for every subsequent store.
    ///
    /// Meant to be called once during setup, after the key authority can be
    /// resolved.
    pub fn enable_cleanup(&self) {
        if !self.cleanup_enabled.swap(true, Ordering::AcqRel) {
            tracing::info!("key cleanup enabled");
        }
    }

    /// Whether stores currently trigger cleanup.
    #[must_use]
    pub fn is_cleanup_enabled(&self) -> bool {
        self.cleanup_enabled.load(Ordering::Acquire)
    }

    /// Reads every stored key element.
    ///
    /// Order is unspecified.
    ///
    /// # Errors
    ///
    /// - [`StorageUnavailable`](crate::StoreError::StorageUnavailable) if the collection cannot be read
    /// - [`MalformedPayload`](crate::StoreError::MalformedPayload) if any stored payload fails to
    ///   parse; no partial result is returned
    #[tracing::instrument(skip(self))]
    pub async fn get_all_elements(&self) -> StoreResult<Vec<XmlElement>> {
        let records = self.collection.find(&RecordFilter::All).await?;
        let elements = records
            .iter()
            .map(|record| {
                record.to_element().inspect_err(|_| {
                    tracing::warn!(record_id = ?record.id(), "stored key payload is not well-formed XML");
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        tracing::debug!(count = elements.len(), "loaded key elements");
        Ok(elements)
    }

    /// Persists a key element and returns the storage id it was given.
    ///
    /// `friendly_name` is accepted for compatibility with key managers that
    /// supply one and is not stored.
    ///
    /// With cleanup enabled, a cleanup pass follows the insert. A failed pass
    /// is logged and does not fail the store: the record is already persisted
    /// and the next store retries the cleanup. Use
    /// [`store_element_with_outcome`](Self::store_element_with_outcome) to
    /// see the cleanup result.
    ///
    /// # Errors
    ///
    /// - [`MalformedPayload`](crate::StoreError::MalformedPayload) if the element cannot be
    ///   serialized to well-formed XML; nothing is inserted
    /// - the collection's error if the insert fails, in which case no cleanup is attempted
    pub async fn store_element(
        &self,
        element: &XmlElement,
        friendly_name: Option<&str>,
    ) -> StoreResult<RecordId> {
        let outcome = self.store_element_with_outcome(element, friendly_name).await?;
        if let Some(error) = outcome.cleanup_error() {
            tracing::warn!(%error, "key cleanup after store failed, retrying on next store");
        }
        Ok(outcome.id)
    }

    /// Persists a key element, then runs cleanup if enabled, and reports
    /// both results.
    ///
    /// # Errors
    ///
    /// Same as [`store_element`](Self::store_element). Cleanup errors are
    /// returned in [`StoreOutcome::cleanup`], not here.
    #[tracing::instrument(name = "store_element", skip(self, element), fields(element = element.name()))]
    pub async fn store_element_with_outcome(
        &self,
        element: &XmlElement,
        friendly_name: Option<&str>,
    ) -> StoreResult<StoreOutcome> {
        let record =
            KeyRecord::from_element_with_id_attribute(element, &self.options.key_id_attribute)?;
        let key_id = record.key_id().map(str::to_owned);

        let id = self.collection.insert_one(record).await?;
        tracing::debug!(record_id = %id, key_id = ?key_id, "stored key element");

        let cleanup = if self.is_cleanup_enabled() {
            Some(self.remove_stale_records().await)
        } else {
            None
        };

        Ok(StoreOutcome { id, cleanup })
    }

    /// Deletes every record whose key id the authority does not report as
    /// valid right now, returning how many were removed.
    ///
    /// Returns `Ok(0)` without touching the authority or the collection when
    /// cleanup is disabled. Running it twice with no write in between
    /// removes nothing the second time.
    ///
    /// # Errors
    ///
    /// - [`AuthorityUnavailable`](crate::StoreError::AuthorityUnavailable) if the authority cannot
    ///   be resolved, or the authority's own error
    /// - [`StorageUnavailable`](crate::StoreError::StorageUnavailable) if the delete fails
    #[tracing::instrument(skip(self))]
    pub async fn remove_stale_records(&self) -> StoreResult<u64> {
        if !self.is_cleanup_enabled() {
            return Ok(0);
        }

        let authority = (self.authority)()?;
        let keys = authority.get_all_keys().await?;

        let now = Utc::now();
        let valid: BTreeSet<String> =
            keys.into_iter().filter(|key| key.is_valid_at(now)).map(|key| key.key_id).collect();

        if valid.is_empty() {
            tracing::warn!("key authority reports no valid keys, every identified record is stale");
        }

        let filter = RecordFilter::KeyIdNotIn {
            key_ids: valid,
            include_unidentified: self.options.unidentified_records == UnidentifiedRecords::Remove,
        };
        let removed = self.collection.delete_many(&filter).await?;

        if removed > 0 {
            tracing::info!(removed, "removed stale key records");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for KeyRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRepository")
            .field("options", &self.options)
            .field("cleanup_enabled", &self.is_cleanup_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::{
        StoreError,
        authority::{KeyAuthority, KeyDescriptor, fixed_resolver},
        memory::MemoryKeyCollection,
    };

    struct Fixed(Vec<KeyDescriptor>);

    #[async_trait::async_trait]
    impl KeyAuthority for Fixed {
        async fn get_all_keys(&self) -> StoreResult<Vec<KeyDescriptor>> {
            Ok(self.0.clone())
        }
    }

    fn unregistered() -> AuthorityResolver {
        Arc::new(|| -> StoreResult<Arc<dyn KeyAuthority>> {
            Err(StoreError::authority_unavailable("never registered"))
        })
    }

    fn key(id: &str) -> XmlElement {
        XmlElement::new("key").with_attribute("id", id)
    }

    fn repository(
        collection: &MemoryKeyCollection,
        authority: Vec<KeyDescriptor>,
    ) -> KeyRepository {
        KeyRepository::new(Arc::new(collection.clone()), fixed_resolver(Arc::new(Fixed(authority))))
    }

    #[tokio::test]
    async fn cleanup_is_disabled_by_default() {
        let collection = MemoryKeyCollection::new();
        let repo = repository(&collection, Vec::new());

        repo.store_element(&key("a"), None).await.unwrap();
        repo.store_element(&key("b"), None).await.unwrap();

        assert!(!repo.is_cleanup_enabled());
        assert_eq!(repo.remove_stale_records().await.unwrap(), 0);
        assert_eq!(collection.len(), 2);
    }

    #[tokio::test]
    async fn disabled_cleanup_never_resolves_authority() {
        let resolver = unregistered();
        let repo = KeyRepository::new(Arc::new(MemoryKeyCollection::new()), resolver);

        repo.store_element(&key("a"), None).await.unwrap();
        assert_eq!(repo.remove_stale_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_fail_store() {
        let collection = MemoryKeyCollection::new();
        let resolver = unregistered();
        let repo = KeyRepository::new(Arc::new(collection.clone()), resolver);
        repo.enable_cleanup();

        repo.store_element(&key("a"), None).await.unwrap();

        assert_eq!(collection.len(), 1);
        assert!(matches!(
            repo.remove_stale_records().await,
            Err(StoreError::AuthorityUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn outcome_reports_cleanup_failure() {
        let collection = MemoryKeyCollection::new();
        let repo = KeyRepository::new(Arc::new(collection.clone()), unregistered());
        repo.enable_cleanup();

        let outcome = repo.store_element_with_outcome(&key("a"), None).await.unwrap();

        assert_eq!(collection.len(), 1);
        assert!(matches!(outcome.cleanup_error(), Some(StoreError::AuthorityUnavailable { .. })));
    }

    #[tokio::test]
    async fn outcome_reports_removed_count() {
        let collection = MemoryKeyCollection::new();
        let valid = vec![KeyDescriptor::new("b", Utc::now() + Duration::days(1))];
        let repo = repository(&collection, valid);
        repo.store_element(&key("a"), None).await.unwrap();
        repo.enable_cleanup();

        let outcome = repo.store_element_with_outcome(&key("b"), None).await.unwrap();

        assert!(matches!(outcome.cleanup, Some(Ok(1))));
        assert!(outcome.cleanup_error().is_none());
    }

    #[tokio::test]
    async fn outcome_without_cleanup_has_no_pass() {
        let repo = repository(&MemoryKeyCollection::new(), Vec::new());
        let outcome = repo.store_element_with_outcome(&key("a"), None).await.unwrap();
        assert!(outcome.cleanup.is_none());
    }

    #[tokio::test]
    async fn unserializable_element_is_not_stored() {
        let collection = MemoryKeyCollection::new();
        let repo = repository(&collection, Vec::new());
        repo.store_element(&key("a"), None).await.unwrap();

        let bad_name = repo.store_element(&XmlElement::new("bad name"), None).await;
        let bad_comment =
            repo.store_element(&key("b").with_comment("x -- y -->z"), None).await;

        assert!(matches!(bad_name, Err(StoreError::MalformedPayload { .. })));
        assert!(matches!(bad_comment, Err(StoreError::MalformedPayload { .. })));
        assert_eq!(collection.len(), 1);
        assert_eq!(repo.get_all_elements().await.unwrap(), vec![key("a")]);
    }

    #[tokio::test]
    async fn unidentified_records_follow_options() {
        let valid = vec![KeyDescriptor::new("a", Utc::now() + Duration::days(1))];

        for (policy, expected) in
            [(UnidentifiedRecords::Retain, 2), (UnidentifiedRecords::Remove, 1)]
        {
            let collection = MemoryKeyCollection::new();
            let options = KeyRepositoryOptions::builder()
                .cleanup_enabled(true)
                .unidentified_records(policy)
                .build()
                .unwrap();
            let repo = KeyRepository::with_options(
                Arc::new(collection.clone()),
                fixed_resolver(Arc::new(Fixed(valid.clone()))),
                options,
            )
            .unwrap();

            repo.store_element(&XmlElement::new("revocation"), None).await.unwrap();
            repo.store_element(&key("a"), None).await.unwrap();

            assert_eq!(collection.len(), expected, "policy {policy:?}");
        }
    }

    #[tokio::test]
    async fn configured_key_id_attribute_drives_cleanup() {
        let collection = MemoryKeyCollection::new();
        let options =
            KeyRepositoryOptions::builder().cleanup_enabled(true).key_id_attribute("kid").build().unwrap();
        let authority = vec![KeyDescriptor::new("keep", Utc::now() + Duration::days(1))];
        let repo = KeyRepository::with_options(
            Arc::new(collection.clone()),
            fixed_resolver(Arc::new(Fixed(authority))),
            options,
        )
        .unwrap();

        repo.store_element(&XmlElement::new("key").with_attribute("kid", "drop"), None)
            .await
            .unwrap();
        repo.store_element(&XmlElement::new("key").with_attribute("kid", "keep"), None)
            .await
            .unwrap();

        let remaining = collection.find(&RecordFilter::All).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key_id(), Some("keep"));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = KeyRepositoryOptions { key_id_attribute: String::new(), ..Default::default() };
        let result = KeyRepository::with_options(
            Arc::new(MemoryKeyCollection::new()),
            fixed_resolver(Arc::new(Fixed(Vec::new()))),
            options,
        );
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn enable_cleanup_is_idempotent() {
        let repo = repository(&MemoryKeyCollection::new(), Vec::new());
        repo.enable_cleanup();
        repo.enable_cleanup();
        assert!(repo.is_cleanup_enabled());
    }
}
