//! Host wiring for the key repository.
//!
//! [`KeyStoreBuilder`] is the one construction point a host uses: select a
//! persistence backend, optionally turn on cleanup, then build. Cleanup needs
//! a backend to clean, so asking for it first is a setup error rather than
//! something discovered at runtime.
//!
//! The key authority is normally built after the repository (it stores its
//! keys through it). The builder hands out an [`AuthoritySlot`] that the host
//! fills once the authority exists; the repository resolves it lazily on
//! each cleanup pass.
//!
//! ```
//! use xmlkeys_storage::{KeyStoreBuilder, MemoryKeyCollection, StoreError};
//!
//! let repository = KeyStoreBuilder::new()
//!     .persist_keys_to(MemoryKeyCollection::new())
//!     .add_key_cleanup()?
//!     .build()?;
//! assert!(repository.is_cleanup_enabled());
//!
//! let out_of_order = KeyStoreBuilder::new().add_key_cleanup();
//! assert!(matches!(out_of_order, Err(StoreError::ConfigurationOrder { .. })));
//! # Ok::<(), StoreError>(())
//! ```

use std::sync::Arc;

use crate::{
    authority::{AuthorityResolver, AuthoritySlot},
    collection::KeyCollection,
    error::{StoreError, StoreResult},
    options::{KeyRepositoryOptions, UnidentifiedRecords},
    repository::KeyRepository,
};

/// Builder for a [`KeyRepository`].
#[derive(Default)]
#[must_use]
pub struct KeyStoreBuilder {
    collection: Option<Arc<dyn KeyCollection>>,
    options: KeyRepositoryOptions,
    slot: AuthoritySlot,
    resolver: Option<AuthorityResolver>,
}

impl KeyStoreBuilder {
    /// Creates a builder with no backend and default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the collection keys are persisted to.
    pub fn persist_keys_to<C>(self, collection: C) -> Self
    where
        C: KeyCollection + 'static,
    {
        self.persist_keys_to_shared(Arc::new(collection))
    }

    /// Selects an already shared collection.
    pub fn persist_keys_to_shared(mut self, collection: Arc<dyn KeyCollection>) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Whether a persistence backend has been selected.
    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.collection.is_some()
    }

    /// Turns on cleanup of stale keys on every store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigurationOrder`] if no persistence backend
    /// has been selected yet. The builder is consumed.
    pub fn add_key_cleanup(mut self) -> StoreResult<Self> {
        if self.collection.is_none() {
            return Err(StoreError::configuration_order(
                "key cleanup requires a persistence backend; select one before adding cleanup",
            ));
        }
        self.options.cleanup_enabled = true;
        Ok(self)
    }

    /// Root attribute the key id is read from (default `id`).
    pub fn key_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.options.key_id_attribute = attribute.into();
        self
    }

    /// Treatment of records without a key id during cleanup.
    pub fn unidentified_records(mut self, policy: UnidentifiedRecords) -> Self {
        self.options.unidentified_records = policy;
        self
    }

    /// Replaces the repository options.
    ///
    /// Cleanup already turned on with [`add_key_cleanup`](Self::add_key_cleanup)
    /// stays on.
    pub fn options(mut self, mut options: KeyRepositoryOptions) -> Self {
        options.cleanup_enabled |= self.options.cleanup_enabled;
        self.options = options;
        self
    }

    /// Uses a custom authority accessor instead of the builder's slot.
    pub fn authority_resolver(mut self, resolver: AuthorityResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Slot the host registers the key authority into.
    ///
    /// Clones share the cell, so the slot can be taken before or after
    /// [`build`](Self::build).
    #[must_use]
    pub fn authority_slot(&self) -> AuthoritySlot {
        self.slot.clone()
    }

    /// Builds the repository.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConfigurationOrder`] if no persistence backend was selected
    /// - [`StoreError::Config`] if the options fail validation
    pub fn build(self) -> StoreResult<KeyRepository> {
        let collection = self.collection.ok_or_else(|| {
            StoreError::configuration_order("no persistence backend selected for key storage")
        })?;
        let resolver = self.resolver.unwrap_or_else(|| self.slot.resolver());

        let repository = KeyRepository::with_options(collection, resolver, self.options)?;
        tracing::debug!(options = ?repository.options(), "key repository configured");
        Ok(repository)
    }
}

impl std::fmt::Debug for KeyStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStoreBuilder")
            .field("has_backend", &self.has_backend())
            .field("options", &self.options)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeyCollection;

    #[test]
    fn cleanup_before_backend_is_an_ordering_error() {
        let result = KeyStoreBuilder::new().add_key_cleanup();
        assert!(matches!(result, Err(StoreError::ConfigurationOrder { .. })));
    }

    #[test]
    fn build_without_backend_is_an_ordering_error() {
        let result = KeyStoreBuilder::new().build();
        assert!(matches!(result, Err(StoreError::ConfigurationOrder { .. })));
    }

    #[test]
    fn cleanup_stays_off_unless_added() {
        let repository =
            KeyStoreBuilder::new().persist_keys_to(MemoryKeyCollection::new()).build().unwrap();
        assert!(!repository.is_cleanup_enabled());
    }

    #[test]
    fn options_are_validated_at_build() {
        let result = KeyStoreBuilder::new()
            .persist_keys_to(MemoryKeyCollection::new())
            .key_id_attribute("")
            .build();
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn settings_reach_the_repository() {
        let repository = KeyStoreBuilder::new()
            .persist_keys_to(MemoryKeyCollection::new())
            .key_id_attribute("kid")
            .unidentified_records(UnidentifiedRecords::Retain)
            .add_key_cleanup()
            .unwrap()
            .build()
            .unwrap();

        assert!(repository.is_cleanup_enabled());
        assert_eq!(repository.options().key_id_attribute(), "kid");
        assert_eq!(repository.options().unidentified_records(), UnidentifiedRecords::Retain);
    }

    #[test]
    fn replacing_options_keeps_added_cleanup() {
        let repository = KeyStoreBuilder::new()
            .persist_keys_to(MemoryKeyCollection::new())
            .add_key_cleanup()
            .unwrap()
            .options(KeyRepositoryOptions::builder().key_id_attribute("kid").build().unwrap())
            .build()
            .unwrap();

        assert!(repository.is_cleanup_enabled());
        assert_eq!(repository.options().key_id_attribute(), "kid");
    }

    #[test]
    fn options_can_enable_cleanup_on_their_own() {
        let options = KeyRepositoryOptions::builder().cleanup_enabled(true).build().unwrap();
        let repository = KeyStoreBuilder::new()
            .persist_keys_to(MemoryKeyCollection::new())
            .options(options)
            .build()
            .unwrap();

        assert!(repository.is_cleanup_enabled());
    }
}
