//! Active key registry.
//!
//! Maps each identity to the key currently applied to its clear-channel
//! traffic. Keys are stored as `Arc<OtpKey>` and replaced wholesale, so a
//! reader holding a key during a transform keeps a consistent key even while
//! rotation swaps in the next one.

use std::{collections::HashMap, sync::Arc};

use otpgate_crypto::{OtpKey, transform};
use otpgate_proto::ConnectionIdentity;
use parking_lot::RwLock;

/// Identity → active key.
///
/// Thread-safe via `Arc<RwLock<_>>`. Clone shares the same underlying map.
#[derive(Clone, Default)]
pub struct KeyRegistry {
    inner: Arc<RwLock<HashMap<ConnectionIdentity, Arc<OtpKey>>>>,
}

impl KeyRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Active key for `identity`.
    pub fn get(&self, identity: ConnectionIdentity) -> Option<Arc<OtpKey>> {
        self.inner.read().get(&identity).cloned()
    }

    /// Install `key` as the active key, returning the key it replaced.
    ///
    /// Outside of tests this is only reached by promoting a pending key.
    pub fn put(
        &self,
        identity: ConnectionIdentity,
        key: impl Into<Arc<OtpKey>>,
    ) -> Option<Arc<OtpKey>> {
        self.inner.write().insert(identity, key.into())
    }

    /// Remove and return the active key.
    pub fn remove(&self, identity: ConnectionIdentity) -> Option<Arc<OtpKey>> {
        self.inner.write().remove(&identity)
    }

    /// Whether `identity` has an active key.
    pub fn contains(&self, identity: ConnectionIdentity) -> bool {
        self.inner.read().contains_key(&identity)
    }

    /// Number of active keys.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no identity has an active key.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drop every key.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Transform `data` with `identity`'s active key.
    ///
    /// Returns `None` when the identity has no active key; the caller decides
    /// whether that means "send as is" or "reject".
    pub fn apply(&self, identity: ConnectionIdentity, data: &[u8]) -> Option<Vec<u8>> {
        let key = self.get(identity)?;
        Some(transform(&key, data))
    }
}
