//! Key authority contract and deferred resolution.
//!
//! The key authority (the host's key manager) owns the notion of which keys
//! are valid. The repository only reads it, and only while cleaning up.
//!
//! The authority is usually built on top of the repository, so the
//! repository cannot take it at construction time. Instead it receives an
//! [`AuthorityResolver`]: a zero-argument accessor invoked each time cleanup
//! runs. Whoever builds the dependency graph decides how the accessor finds
//! the authority; [`AuthoritySlot`] is the stock answer, a register-once
//! cell holding a weak reference.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use xmlkeys_storage::{AuthoritySlot, KeyAuthority, KeyDescriptor, StoreResult};
//!
//! struct FixedAuthority;
//!
//! #[async_trait::async_trait]
//! impl KeyAuthority for FixedAuthority {
//!     async fn get_all_keys(&self) -> StoreResult<Vec<KeyDescriptor>> {
//!         Ok(vec![KeyDescriptor::new("k1", Utc::now() + Duration::days(90))])
//!     }
//! }
//!
//! let slot = AuthoritySlot::new();
//! let resolver = slot.resolver();
//! assert!(resolver().is_err());
//!
//! let authority = Arc::new(FixedAuthority);
//! slot.register(&authority)?;
//! assert!(resolver().is_ok());
//! # Ok::<(), xmlkeys_storage::StoreError>(())
//! ```

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The authority's view of one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    /// Key id, matched against the records' extracted key id.
    pub key_id: String,
    /// Instant after which the key is no longer valid.
    pub expires_at: DateTime<Utc>,
    /// Whether the key has been revoked.
    pub revoked: bool,
}

impl KeyDescriptor {
    /// Creates a non-revoked descriptor.
    #[must_use]
    pub fn new(key_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { key_id: key_id.into(), expires_at, revoked: false }
    }

    /// Marks the descriptor as revoked.
    #[must_use]
    pub fn revoked(mut self) -> Self {
        self.revoked = true;
        self
    }

    /// A key is valid while it is not revoked and has not yet expired.
    ///
    /// Expiry is exclusive: a key expiring exactly at `now` is invalid.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Source of truth for key validity.
#[async_trait]
pub trait KeyAuthority: Send + Sync {
    /// Every key the authority knows about, valid or not.
    async fn get_all_keys(&self) -> StoreResult<Vec<KeyDescriptor>>;
}

/// Deferred accessor for the key authority.
///
/// Invoked once per cleanup pass. Caching is the accessor's business, not
/// the repository's.
pub type AuthorityResolver = Arc<dyn Fn() -> StoreResult<Arc<dyn KeyAuthority>> + Send + Sync>;

/// Resolver that always returns the given authority.
///
/// For hosts where the authority does not depend on the repository.
#[must_use]
pub fn fixed_resolver(authority: Arc<dyn KeyAuthority>) -> AuthorityResolver {
    Arc::new(move || Ok(Arc::clone(&authority)))
}

/// Register-once cell for the key authority.
///
/// Holds a [`Weak`] reference: the authority owns the repository, which owns
/// the resolver, so a strong reference would form a cycle. Clones share the
/// same cell.
#[derive(Clone, Default)]
pub struct AuthoritySlot {
    authority: Arc<OnceLock<Weak<dyn KeyAuthority>>>,
}

impl AuthoritySlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the authority.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigurationOrder`] if an authority was already
    /// registered.
    pub fn register<A>(&self, authority: &Arc<A>) -> StoreResult<()>
    where
        A: KeyAuthority + 'static,
    {
        let weak: Weak<A> = Arc::downgrade(authority);
        let weak: Weak<dyn KeyAuthority> = weak;
        self.authority
            .set(weak)
            .map_err(|_| StoreError::configuration_order("a key authority is already registered"))?;
        tracing::debug!("key authority registered");
        Ok(())
    }

    /// Whether an authority has been registered (it may since have been dropped).
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.authority.get().is_some()
    }

    /// Returns the registered authority.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AuthorityUnavailable`] if nothing is registered
    /// or the registered authority has been dropped.
    pub fn resolve(&self) -> StoreResult<Arc<dyn KeyAuthority>> {
        let weak = self.authority.get().ok_or_else(|| {
            StoreError::authority_unavailable("no key authority has been registered")
        })?;
        weak.upgrade()
            .ok_or_else(|| StoreError::authority_unavailable("the key authority has been dropped"))
    }

    /// Resolver backed by this slot.
    #[must_use]
    pub fn resolver(&self) -> AuthorityResolver {
        let slot = self.clone();
        Arc::new(move || slot.resolve())
    }
}

impl std::fmt::Debug for AuthoritySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritySlot").field("registered", &self.is_registered()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    use super::*;

    struct EmptyAuthority;

    #[async_trait]
    impl KeyAuthority for EmptyAuthority {
        async fn get_all_keys(&self) -> StoreResult<Vec<KeyDescriptor>> {
            Ok(Vec::new())
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[rstest]
    #[case::future(KeyDescriptor::new("k", at(60)), true)]
    #[case::past(KeyDescriptor::new("k", at(-60)), false)]
    #[case::expires_now(KeyDescriptor::new("k", at(0)), false)]
    #[case::revoked(KeyDescriptor::new("k", at(60)).revoked(), false)]
    #[case::revoked_and_expired(KeyDescriptor::new("k", at(-60)).revoked(), false)]
    fn validity(#[case] descriptor: KeyDescriptor, #[case] valid: bool) {
        assert_eq!(descriptor.is_valid_at(at(0)), valid);
    }

    #[test]
    fn unregistered_slot_is_unavailable() {
        let slot = AuthoritySlot::new();
        assert!(!slot.is_registered());
        assert!(matches!(slot.resolve(), Err(StoreError::AuthorityUnavailable { .. })));
    }

    #[test]
    fn resolver_sees_later_registration() {
        let slot = AuthoritySlot::new();
        let resolver = slot.resolver();
        let authority = Arc::new(EmptyAuthority);

        slot.register(&authority).unwrap();

        assert!(resolver().is_ok());
    }

    #[test]
    fn registration_holds_no_strong_reference() {
        let slot = AuthoritySlot::new();
        let authority = Arc::new(EmptyAuthority);

        slot.register(&authority).unwrap();
        let resolved = slot.resolve().unwrap();

        assert_eq!(Arc::strong_count(&authority), 2);
        drop(resolved);
        assert_eq!(Arc::strong_count(&authority), 1);
    }

    #[test]
    fn second_registration_is_rejected() {
        let slot = AuthoritySlot::new();
        let first = Arc::new(EmptyAuthority);
        let second = Arc::new(EmptyAuthority);

        slot.register(&first).unwrap();
        let result = slot.register(&second);

        assert!(matches!(result, Err(StoreError::ConfigurationOrder { .. })));
    }

    #[test]
    fn dropped_authority_is_unavailable() {
        let slot = AuthoritySlot::new();
        let authority = Arc::new(EmptyAuthority);
        slot.register(&authority).unwrap();
        drop(authority);

        assert!(slot.is_registered());
        assert!(matches!(slot.resolve(), Err(StoreError::AuthorityUnavailable { .. })));
    }

    #[tokio::test]
    async fn fixed_resolver_returns_authority() {
        let resolver = fixed_resolver(Arc::new(EmptyAuthority));
        let authority = resolver().unwrap();
        assert!(authority.get_all_keys().await.unwrap().is_empty());
    }

    #[test]
    fn descriptor_expiry_arithmetic() {
        let descriptor = KeyDescriptor::new("k", at(0) + Duration::seconds(1));
        assert!(descriptor.is_valid_at(at(0)));
    }
}
