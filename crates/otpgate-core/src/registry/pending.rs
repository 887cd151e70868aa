//! Pending key registry with time-based expiry.
//!
//! A pending key exists only between "generated" and one of: acknowledged
//! (promoted to the active registry), expired, or removed. Each `put` arms a
//! timer task through the [`Environment`]; replacing or removing the entry
//! cancels it.
//!
//! # Expiry
//!
//! ```text
//! put(id, key) ──► entry{deadline, generation} + timer task
//!                     │
//!        ┌────────────┼─────────────────┐
//!        ▼            ▼                 ▼
//!  take/remove   put(id, key')     sleep(expiry)
//!  cancel timer  cancel old timer  remove if generation matches
//! ```
//!
//! Lookups also compare the deadline against `now()`, so an entry is never
//! observable past its deadline even if the timer task has not run yet.
//!
//! # Retired keys
//!
//! The last key that expired or was replaced stays behind as a retired key,
//! so a late acknowledgement sealed under it can still be recognised and
//! refused. It is never promoted. `remove`, `clear`, a successful
//! `take_if` and a `put` with no entry to replace drop it.

use std::{collections::HashMap, sync::Arc, time::Duration};

use otpgate_crypto::OtpKey;
use otpgate_proto::ConnectionIdentity;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{env::Environment, error::ConfigError};

/// Identity → newly generated key awaiting acknowledgement.
///
/// Clone shares the same underlying map.
pub struct PendingKeyRegistry<E: Environment> {
    env: E,
    expiry: Duration,
    inner: Arc<Mutex<PendingInner<E::Instant>>>,
}

struct PendingInner<I> {
    entries: HashMap<ConnectionIdentity, PendingEntry<I>>,
    retired: HashMap<ConnectionIdentity, Arc<OtpKey>>,
    next_generation: u64,
    expired: u64,
}

struct PendingEntry<I> {
    key: Arc<OtpKey>,
    deadline: I,
    generation: u64,
    cancel: oneshot::Sender<()>,
}

impl<I> PendingEntry<I> {
    fn into_key(self) -> Arc<OtpKey> {
        // Receiver is gone once the timer has fired
        let _ = self.cancel.send(());
        self.key
    }
}

impl<E: Environment> Clone for PendingKeyRegistry<E> {
    fn clone(&self) -> Self {
        Self { env: self.env.clone(), expiry: self.expiry, inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> PendingKeyRegistry<E> {
    /// Create a registry whose entries live for `expiry`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::ZeroExpiry` if `expiry` is zero
    pub fn new(env: E, expiry: Duration) -> Result<Self, ConfigError> {
        if expiry.is_zero() {
            return Err(ConfigError::ZeroExpiry(expiry));
        }

        Ok(Self {
            env,
            expiry,
            inner: Arc::new(Mutex::new(PendingInner {
                entries: HashMap::new(),
                retired: HashMap::new(),
                next_generation: 0,
                expired: 0,
            })),
        })
    }

    /// Configured lifetime of an entry.
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Stage `key` for `identity`, replacing (and cancelling) any previous
    /// pending key, and arm a new expiry timer.
    pub fn put(&self, identity: ConnectionIdentity, key: impl Into<Arc<OtpKey>>) {
        let (cancel, cancelled) = oneshot::channel();
        let deadline = self.env.now() + self.expiry;

        let generation = {
            let mut inner = self.inner.lock();
            let generation = inner.next_generation;
            inner.next_generation += 1;

            let entry = PendingEntry { key: key.into(), deadline, generation, cancel };
            match inner.entries.insert(identity, entry) {
                Some(previous) => {
                    inner.retired.insert(identity, previous.into_key());
                },
                None => {
                    inner.retired.remove(&identity);
                },
            }
            generation
        };

        let env = self.env.clone();
        let expiry = self.expiry;
        let inner = Arc::downgrade(&self.inner);

        self.env.spawn(async move {
            tokio::select! {
                () = env.sleep(expiry) => {
                    if let Some(inner) = inner.upgrade() {
                        expire(&mut inner.lock(), identity, generation);
                    }
                }
                _ = cancelled => {}
            }
        });
    }

    /// Pending key for `identity`, if one exists and has not expired.
    pub fn get(&self, identity: ConnectionIdentity) -> Option<Arc<OtpKey>> {
        let now = self.env.now();
        let mut inner = self.inner.lock();

        let entry = inner.entries.get(&identity)?;
        if entry.deadline > now {
            return Some(Arc::clone(&entry.key));
        }

        let generation = entry.generation;
        expire(&mut inner, identity, generation);
        None
    }

    /// Whether a live pending key exists for `identity`.
    pub fn contains(&self, identity: ConnectionIdentity) -> bool {
        self.get(identity).is_some()
    }

    /// Remove and return the pending key, cancelling its timer.
    pub fn remove(&self, identity: ConnectionIdentity) -> Option<Arc<OtpKey>> {
        let now = self.env.now();
        let entry = {
            let mut inner = self.inner.lock();
            inner.retired.remove(&identity);
            inner.entries.remove(&identity)?
        };

        let live = entry.deadline > now;
        let key = entry.into_key();
        live.then_some(key)
    }

    /// Remove the pending key only if it is still `expected`.
    ///
    /// Used on acknowledgement: if a newer key was staged after the client's
    /// acknowledgement was decrypted, the newer key stays pending.
    pub fn take_if(
        &self,
        identity: ConnectionIdentity,
        expected: &Arc<OtpKey>,
    ) -> Option<Arc<OtpKey>> {
        let now = self.env.now();
        let mut inner = self.inner.lock();

        let entry = inner.entries.get(&identity)?;
        if !Arc::ptr_eq(&entry.key, expected) || entry.deadline <= now {
            return None;
        }

        inner.retired.remove(&identity);
        inner.entries.remove(&identity).map(PendingEntry::into_key)
    }

    /// Last key for `identity` that expired or was replaced before being
    /// acknowledged.
    pub fn retired(&self, identity: ConnectionIdentity) -> Option<Arc<OtpKey>> {
        self.inner.lock().retired.get(&identity).cloned()
    }

    /// Number of stored entries, including any past their deadline whose
    /// timer has not fired yet.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Total entries removed by expiry since creation.
    pub fn expired_total(&self) -> u64 {
        self.inner.lock().expired
    }

    /// Drop every entry and cancel every timer.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.retired.clear();
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.into_key();
        }
    }
}

fn expire<I>(inner: &mut PendingInner<I>, identity: ConnectionIdentity, generation: u64) {
    let current = inner.entries.get(&identity).is_some_and(|entry| entry.generation == generation);
    if current && let Some(entry) = inner.entries.remove(&identity) {
        inner.retired.insert(identity, entry.into_key());
        inner.expired += 1;
        tracing::debug!(%identity, "pending key expired before acknowledgement");
    }
}
