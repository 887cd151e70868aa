//! Connection registry for key lookup, groups and broadcast.
//!
//! The registry maintains three structures: key → connection (for direct
//! sends), connection → keys (for cleanup on close), and group name →
//! members (for broadcast). A connection may sit under several keys (identity,
//! user, session) and in several groups at once.
//!
//! Every connection that enters the registry gets a close hook, so all of its
//! keys and group memberships disappear as soon as the transport reports the
//! close. Sends are best effort: a closed or failing target is logged and
//! skipped, never surfaced to the caller as an error.
//!
//! # Locking
//!
//! The key index and the groups sit behind separate `RwLock`s. Broadcast takes
//! only the group read lock, so concurrent broadcasts never block each other;
//! joins, leaves and close cleanup take the write lock. No lock is held while
//! a transport is called.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::Hash,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use otpgate_proto::ConnectionIdentity;
use parking_lot::{Mutex, RwLock};

use crate::transport::Transport;

/// Group every clear connection joins on accept.
pub const ALL_GROUP: &str = "ALL";

/// Per-recipient rewrite applied to every outbound payload.
///
/// The handshake installs one that encrypts each copy under the recipient's
/// active key, so a single broadcast reaches every member readable by it.
pub trait OutboundTransform: Send + Sync + 'static {
    /// Payload to hand to `recipient`'s transport.
    fn apply(&self, recipient: ConnectionIdentity, payload: &Bytes) -> Bytes;
}

/// Key → live connection, plus named groups.
///
/// Clone shares the same underlying maps.
pub struct ConnectionRegistry<K, T> {
    inner: Arc<RegistryInner<K, T>>,
}

struct RegistryInner<K, T> {
    label: &'static str,
    index: RwLock<KeyIndex<K, T>>,
    groups: RwLock<HashMap<String, HashMap<ConnectionIdentity, Arc<T>>>>,
    watched: Mutex<HashSet<ConnectionIdentity>>,
    transform: Option<Arc<dyn OutboundTransform>>,
}

struct KeyIndex<K, T> {
    by_key: HashMap<K, Arc<T>>,
    by_connection: HashMap<ConnectionIdentity, HashSet<K>>,
}

impl<K, T> Clone for ConnectionRegistry<K, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, T> fmt::Debug for ConnectionRegistry<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("label", &self.inner.label)
            .field("keys", &self.inner.index.read().by_key.len())
            .field("groups", &self.inner.groups.read().len())
            .finish_non_exhaustive()
    }
}

impl<K, T> ConnectionRegistry<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Transport,
{
    /// Empty registry; `label` names the transport kind in logs.
    pub fn new(label: &'static str) -> Self {
        Self::build(label, None)
    }

    /// Empty registry that passes every outbound payload through `transform`.
    pub fn with_transform(label: &'static str, transform: Arc<dyn OutboundTransform>) -> Self {
        Self::build(label, Some(transform))
    }

    fn build(label: &'static str, transform: Option<Arc<dyn OutboundTransform>>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                label,
                index: RwLock::new(KeyIndex {
                    by_key: HashMap::new(),
                    by_connection: HashMap::new(),
                }),
                groups: RwLock::new(HashMap::new()),
                watched: Mutex::new(HashSet::new()),
                transform,
            }),
        }
    }

    /// Register `connection` under `key`, returning the connection previously
    /// registered there.
    ///
    /// If `connection` is already closed, its close hook runs immediately and
    /// the entry is gone again before this returns.
    pub fn put(&self, key: K, connection: Arc<T>) -> Option<Arc<T>> {
        let id = connection.id();
        let previous = {
            let mut index = self.inner.index.write();
            let previous = index.by_key.insert(key.clone(), Arc::clone(&connection));
            if let Some(previous) = &previous {
                let old_id = previous.id();
                if old_id != id {
                    index.unlink(old_id, &key);
                }
            }
            index.by_connection.entry(id).or_default().insert(key);
            previous
        };

        self.watch(&connection);
        previous
    }

    /// Connection registered under `key`.
    pub fn get(&self, key: &K) -> Option<Arc<T>> {
        self.inner.index.read().by_key.get(key).cloned()
    }

    /// Remove `key`. Group memberships of the connection are untouched.
    pub fn remove(&self, key: &K) -> Option<Arc<T>> {
        let mut index = self.inner.index.write();
        let connection = index.by_key.remove(key)?;
        index.unlink(connection.id(), key);
        Some(connection)
    }

    /// Every key currently mapping to `connection`.
    pub fn keys_for_connection(&self, connection: ConnectionIdentity) -> HashSet<K> {
        self.inner.index.read().by_connection.get(&connection).cloned().unwrap_or_default()
    }

    /// Add `connection` to `group`. Returns `false` if it was already a member.
    pub fn join_group(&self, group: &str, connection: Arc<T>) -> bool {
        let inserted = {
            let mut groups = self.inner.groups.write();
            let members = groups.entry(group.to_string()).or_default();
            if members.contains_key(&connection.id()) {
                false
            } else {
                members.insert(connection.id(), Arc::clone(&connection));
                true
            }
        };

        if inserted {
            self.watch(&connection);
        }
        inserted
    }

    /// Remove `connection` from `group`. Empty groups are dropped.
    pub fn leave_group(&self, group: &str, connection: ConnectionIdentity) -> bool {
        let mut groups = self.inner.groups.write();
        let Some(members) = groups.get_mut(group) else {
            return false;
        };

        let removed = members.remove(&connection).is_some();
        if members.is_empty() {
            groups.remove(group);
        }
        removed
    }

    /// Whether `connection` belongs to `group`.
    pub fn is_member(&self, group: &str, connection: ConnectionIdentity) -> bool {
        self.inner.groups.read().get(group).is_some_and(|members| members.contains_key(&connection))
    }

    /// Snapshot of `group`'s members.
    pub fn members(&self, group: &str) -> Vec<Arc<T>> {
        self.inner
            .groups
            .read()
            .get(group)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connections in `group`.
    pub fn group_len(&self, group: &str) -> usize {
        self.inner.groups.read().get(group).map_or(0, HashMap::len)
    }

    /// Deliver `payload` to the connection under `key`.
    ///
    /// Returns whether the transport accepted it. Missing, closed and failing
    /// targets are logged and skipped.
    pub fn send_to(&self, key: &K, payload: Bytes) -> bool {
        let Some(connection) = self.get(key) else {
            tracing::debug!(transport = self.inner.label, ?key, "send to unregistered key");
            return false;
        };
        self.deliver(&connection, &payload)
    }

    /// Deliver `payload` to every member of `group` except the connections
    /// registered under `except`.
    ///
    /// Returns how many members accepted the payload.
    pub fn send_to_group(&self, group: &str, payload: Bytes, except: &[K]) -> usize {
        let excluded: HashSet<ConnectionIdentity> = {
            let index = self.inner.index.read();
            except.iter().filter_map(|key| index.by_key.get(key)).map(|conn| conn.id()).collect()
        };

        let recipients: Vec<Arc<T>> = {
            let groups = self.inner.groups.read();
            let Some(members) = groups.get(group) else {
                return 0;
            };
            members
                .iter()
                .filter(|(id, _)| !excluded.contains(id))
                .map(|(_, conn)| Arc::clone(conn))
                .collect()
        };

        recipients.iter().filter(|connection| self.deliver(connection, &payload)).count()
    }

    /// Remove every key and group membership of `connection`.
    ///
    /// Runs automatically from the close hook; returns the keys removed.
    pub fn unregister(&self, connection: ConnectionIdentity) -> HashSet<K> {
        self.inner.forget(connection)
    }

    /// Close every registered connection.
    pub fn close_all(&self) {
        let connections: HashMap<ConnectionIdentity, Arc<T>> = {
            let index = self.inner.index.read();
            let groups = self.inner.groups.read();
            index
                .by_key
                .values()
                .chain(groups.values().flat_map(HashMap::values))
                .map(|conn| (conn.id(), Arc::clone(conn)))
                .collect()
        };

        for connection in connections.values() {
            connection.close();
        }
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.inner.index.read().by_key.len()
    }

    /// Whether no key is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.index.read().by_key.is_empty()
    }

    fn deliver(&self, connection: &Arc<T>, payload: &Bytes) -> bool {
        let id = connection.id();
        if !connection.is_open() {
            tracing::warn!(
                transport = self.inner.label,
                connection = %id,
                "dropping send to closed connection"
            );
            return false;
        }

        let payload = match &self.inner.transform {
            Some(transform) => transform.apply(id, payload),
            None => payload.clone(),
        };

        match connection.send(payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(transport = self.inner.label, connection = %id, "send failed: {e}");
                false
            },
        }
    }

    fn watch(&self, connection: &Arc<T>) {
        let id = connection.id();
        if self.inner.watched.lock().insert(id) {
            let inner: Weak<RegistryInner<K, T>> = Arc::downgrade(&self.inner);
            connection.on_close(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    let keys = inner.forget(id);
                    tracing::debug!(
                        transport = inner.label,
                        connection = %id,
                        ?keys,
                        "connection closed, registry entries removed"
                    );
                }
            }));
        }

        // Close may have raced the insert above
        if !connection.is_open() {
            self.inner.forget(id);
        }
    }
}

impl<K, T> RegistryInner<K, T>
where
    K: Eq + Hash + Clone,
    T: Transport,
{
    fn forget(&self, connection: ConnectionIdentity) -> HashSet<K> {
        let keys = {
            let mut index = self.index.write();
            let keys = index.by_connection.remove(&connection).unwrap_or_default();
            for key in &keys {
                if index.by_key.get(key).is_some_and(|conn| conn.id() == connection) {
                    index.by_key.remove(key);
                }
            }
            keys
        };

        {
            let mut groups = self.groups.write();
            groups.retain(|_, members| {
                members.remove(&connection);
                !members.is_empty()
            });
        }

        self.watched.lock().remove(&connection);
        keys
    }
}

impl<K: Eq + Hash, T> KeyIndex<K, T> {
    fn unlink(&mut self, connection: ConnectionIdentity, key: &K) {
        if let Some(keys) = self.by_connection.get_mut(&connection) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_connection.remove(&connection);
            }
        }
    }
}
