//! Clear/encrypted channel pairs.
//!
//! Each identity owns a long-lived clear connection and, during a handshake,
//! one short-lived encrypted connection. The encrypted slot empties when that
//! connection closes; the pair itself is dropped once neither slot holds a
//! live connection.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use otpgate_proto::ConnectionIdentity;
use parking_lot::Mutex;

use crate::{error::RegistryError, transport::Transport};

/// Which side of a pair a connection occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Long-lived application channel
    Clear,
    /// One-shot key exchange channel
    Encrypted,
}

struct ChannelPair<T> {
    clear: Option<Arc<T>>,
    encrypted: Option<Arc<T>>,
}

impl<T> Default for ChannelPair<T> {
    fn default() -> Self {
        Self { clear: None, encrypted: None }
    }
}

impl<T: Transport> ChannelPair<T> {
    fn slot(&self, role: ChannelRole) -> Option<&Arc<T>> {
        match role {
            ChannelRole::Clear => self.clear.as_ref(),
            ChannelRole::Encrypted => self.encrypted.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: ChannelRole) -> &mut Option<Arc<T>> {
        match role {
            ChannelRole::Clear => &mut self.clear,
            ChannelRole::Encrypted => &mut self.encrypted,
        }
    }

    fn live(&self, role: ChannelRole) -> Option<&Arc<T>> {
        self.slot(role).filter(|conn| conn.is_open())
    }

    fn prune(&mut self) -> bool {
        for role in [ChannelRole::Clear, ChannelRole::Encrypted] {
            if self.live(role).is_none() {
                *self.slot_mut(role) = None;
            }
        }
        self.clear.is_none() && self.encrypted.is_none()
    }
}

/// Identity → clear and encrypted connection.
///
/// Thread-safe via `Arc<Mutex<_>>`. Clone shares the same underlying map.
pub struct ChannelPairRegistry<T> {
    inner: Arc<Mutex<HashMap<ConnectionIdentity, ChannelPair<T>>>>,
}

impl<T> Clone for ChannelPairRegistry<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for ChannelPairRegistry<T> {
    fn default() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<T: Transport> ChannelPairRegistry<T> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the clear connection for `identity`, creating the pair.
    pub fn set_clear(&self, identity: ConnectionIdentity, connection: Arc<T>) {
        self.set(identity, ChannelRole::Clear, connection);
    }

    /// Install the encrypted connection for `identity`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotEncrypted` if the connection is not TLS-secured
    pub fn set_encrypted(
        &self,
        identity: ConnectionIdentity,
        connection: Arc<T>,
    ) -> Result<(), RegistryError> {
        if !connection.is_secure() {
            return Err(RegistryError::NotEncrypted { connection: connection.id() });
        }
        self.set(identity, ChannelRole::Encrypted, connection);
        Ok(())
    }

    /// Store `connection` in a slot and watch it for close.
    ///
    /// Re-setting the connection already in the slot registers no second
    /// close callback.
    fn set(&self, identity: ConnectionIdentity, role: ChannelRole, connection: Arc<T>) {
        let connection_id = connection.id();
        let already_watched = {
            let mut pairs = self.inner.lock();
            let slot = pairs.entry(identity).or_default().slot_mut(role);
            let same = slot.as_ref().is_some_and(|conn| conn.id() == connection_id);
            *slot = Some(Arc::clone(&connection));
            same
        };
        if already_watched {
            return;
        }

        let inner = Arc::downgrade(&self.inner);
        connection.on_close(Box::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut pairs = inner.lock();
            let Some(pair) = pairs.get_mut(&identity) else {
                return;
            };

            if pair.slot(role).is_some_and(|conn| conn.id() == connection_id) {
                *pair.slot_mut(role) = None;
            }
            if pair.prune() {
                pairs.remove(&identity);
                tracing::debug!(%identity, "channel pair removed");
            }
        }));
    }

    /// Both slots present and open.
    pub fn is_active(&self, identity: ConnectionIdentity) -> bool {
        self.inner.lock().get(&identity).is_some_and(|pair| {
            pair.live(ChannelRole::Clear).is_some() && pair.live(ChannelRole::Encrypted).is_some()
        })
    }

    /// Whether a pair exists for `identity`.
    pub fn contains(&self, identity: ConnectionIdentity) -> bool {
        self.inner.lock().contains_key(&identity)
    }

    /// Open clear connection for `identity`.
    pub fn clear_of(&self, identity: ConnectionIdentity) -> Option<Arc<T>> {
        self.connection(identity, ChannelRole::Clear)
    }

    /// Open encrypted connection for `identity`.
    pub fn encrypted_of(&self, identity: ConnectionIdentity) -> Option<Arc<T>> {
        self.connection(identity, ChannelRole::Encrypted)
    }

    fn connection(&self, identity: ConnectionIdentity, role: ChannelRole) -> Option<Arc<T>> {
        self.inner.lock().get(&identity)?.live(role).cloned()
    }

    /// Identity and role of the pair slot holding `connection`.
    pub fn identity_of(
        &self,
        connection: ConnectionIdentity,
    ) -> Option<(ConnectionIdentity, ChannelRole)> {
        self.inner.lock().iter().find_map(|(identity, pair)| {
            [ChannelRole::Clear, ChannelRole::Encrypted].into_iter().find_map(|role| {
                pair.slot(role).filter(|conn| conn.id() == connection).map(|_| (*identity, role))
            })
        })
    }

    /// Whether both live slots share a remote host.
    ///
    /// Ports are ignored: the encrypted channel is a separate TCP connection
    /// and always arrives from a different source port.
    pub fn hosts_match(&self, identity: ConnectionIdentity) -> bool {
        let pairs = self.inner.lock();
        let Some(pair) = pairs.get(&identity) else {
            return false;
        };

        match (pair.live(ChannelRole::Clear), pair.live(ChannelRole::Encrypted)) {
            (Some(clear), Some(encrypted)) => {
                same_host(clear.remote_addr(), encrypted.remote_addr())
            },
            _ => false,
        }
    }

    /// Whether `remote` is on the same host as `identity`'s open clear
    /// connection.
    ///
    /// Decides on the caller's own address, so a concurrent change to the
    /// encrypted slot cannot affect the result.
    pub fn host_matches_clear(&self, identity: ConnectionIdentity, remote: SocketAddr) -> bool {
        self.clear_of(identity).is_some_and(|clear| same_host(clear.remote_addr(), remote))
    }

    /// Send `payload` unmodified over the clear connection.
    pub fn send_over_clear(&self, identity: ConnectionIdentity, payload: Bytes) -> bool {
        self.send(identity, ChannelRole::Clear, payload)
    }

    /// Send `payload` over the encrypted connection.
    pub fn send_over_encrypted(&self, identity: ConnectionIdentity, payload: Bytes) -> bool {
        self.send(identity, ChannelRole::Encrypted, payload)
    }

    fn send(&self, identity: ConnectionIdentity, role: ChannelRole, payload: Bytes) -> bool {
        let Some(connection) = self.connection(identity, role) else {
            tracing::warn!(%identity, ?role, "no open channel for send");
            return false;
        };

        match connection.send(payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%identity, ?role, "send failed: {e}");
                false
            },
        }
    }

    /// Drop the pair for `identity` without closing its connections.
    pub fn remove(&self, identity: ConnectionIdentity) -> bool {
        self.inner.lock().remove(&identity).is_some()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every pair.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

fn same_host(a: SocketAddr, b: SocketAddr) -> bool {
    a.ip().to_canonical() == b.ip().to_canonical()
}
