//! Server-wide state shared by every listener.
//!
//! The key and pending-key registries are global: an identity's keys are the
//! same whichever listener it arrived through. Everything else lives in one
//! [`TransportLayer`] per transport kind, so a TLS socket only ever pairs
//! with a TCP socket and a secure WebSocket only with a WebSocket.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use otpgate_core::{
    ALL_GROUP, ClearOutcome, ConnectionRegistry, EncryptedOutcome, Environment, HandshakeConfig,
    HandshakeProcessor, IdentityGenerator, KeyRegistry, MetricsSnapshot, PendingKeyRegistry,
    SequentialIdentities, Transport,
};
use otpgate_proto::{ConnectionIdentity, JsonCodec};

use crate::error::ServerError;

/// Which family of listeners a connection arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// TCP (clear) and TLS (encrypted) sockets.
    Socket,
    /// WebSocket (clear) and secure WebSocket (encrypted).
    WebSocket,
}

impl TransportKind {
    /// Label used in logs.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Connection registry key.
///
/// Every clear connection is registered under its identity. The login
/// layer may additionally bind a user name or session id to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// Connection identity assigned at accept.
    Identity(ConnectionIdentity),
    /// Authenticated user name.
    User(String),
    /// Login session id.
    Session(u64),
}

/// Registry and handshake processor for one transport kind.
pub struct TransportLayer<T: Transport, E: Environment> {
    kind: TransportKind,
    connections: ConnectionRegistry<ChannelKey, T>,
    handshake: HandshakeProcessor<T, JsonCodec, E>,
}

impl<T: Transport, E: Environment> TransportLayer<T, E> {
    fn new(
        kind: TransportKind,
        env: E,
        config: &HandshakeConfig,
        keys: &KeyRegistry,
        pending: &PendingKeyRegistry<E>,
    ) -> Result<Self, ServerError> {
        let policy = config.validate()?;
        let handshake =
            HandshakeProcessor::new(env, JsonCodec, policy, keys.clone(), pending.clone());
        let connections =
            ConnectionRegistry::with_transform(kind.label(), Arc::new(handshake.clear_cipher()));
        Ok(Self { kind, connections, handshake })
    }

    /// Transport kind served by this layer.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Clear connections by key.
    pub fn connections(&self) -> &ConnectionRegistry<ChannelKey, T> {
        &self.connections
    }

    /// Handshake processor for this layer's channel pairs.
    pub fn handshake(&self) -> &HandshakeProcessor<T, JsonCodec, E> {
        &self.handshake
    }
}

/// Shared server state.
pub struct ServerContext<T: Transport, E: Environment> {
    config: HandshakeConfig,
    identities: Box<dyn IdentityGenerator>,
    keys: KeyRegistry,
    pending: PendingKeyRegistry<E>,
    socket: TransportLayer<T, E>,
    websocket: TransportLayer<T, E>,
}

impl<T: Transport, E: Environment> ServerContext<T, E> {
    /// Validate `config` and build empty registries.
    ///
    /// # Errors
    ///
    /// - `ServerError::Handshake` if `config` fails validation
    pub fn new(env: E, config: HandshakeConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let keys = KeyRegistry::new();
        let pending = PendingKeyRegistry::new(env.clone(), config.pending_expiry)?;
        let socket =
            TransportLayer::new(TransportKind::Socket, env.clone(), &config, &keys, &pending)?;
        let websocket =
            TransportLayer::new(TransportKind::WebSocket, env, &config, &keys, &pending)?;

        Ok(Self {
            config,
            identities: Box::new(SequentialIdentities::new()),
            keys,
            pending,
            socket,
            websocket,
        })
    }

    /// Replace the identity generator.
    #[must_use]
    pub fn with_identities(mut self, identities: impl IdentityGenerator) -> Self {
        self.identities = Box::new(identities);
        self
    }

    /// Validated handshake configuration.
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Active keys, shared by every layer.
    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    /// Pending keys, shared by every layer.
    pub fn pending(&self) -> &PendingKeyRegistry<E> {
        &self.pending
    }

    /// Layer for `kind`.
    pub fn layer(&self, kind: TransportKind) -> &TransportLayer<T, E> {
        match kind {
            TransportKind::Socket => &self.socket,
            TransportKind::WebSocket => &self.websocket,
        }
    }

    /// Handshake counters for `kind`.
    pub fn metrics(&self, kind: TransportKind) -> MetricsSnapshot {
        self.layer(kind).handshake.metrics()
    }

    /// Identity for a newly accepted connection.
    pub fn next_identity(&self) -> ConnectionIdentity {
        self.identities.next_identity()
    }

    /// Register a freshly accepted clear connection.
    ///
    /// The connection is keyed by its identity, joins the `ALL` group and
    /// receives its `Welcome`.
    pub fn accept_clear(&self, kind: TransportKind, connection: &Arc<T>) {
        let layer = self.layer(kind);
        let identity = connection.id();

        layer.connections.put(ChannelKey::Identity(identity), Arc::clone(connection));
        layer.connections.join_group(ALL_GROUP, Arc::clone(connection));
        layer.handshake.attach_clear(connection);

        tracing::info!(
            transport = kind.label(),
            %identity,
            remote = %connection.remote_addr(),
            "clear connection accepted"
        );
    }

    /// Handle one inbound clear-channel message.
    ///
    /// Application payloads are relayed to every other member of `ALL`,
    /// each copy sealed for its recipient.
    pub fn on_clear_message(
        &self,
        kind: TransportKind,
        connection: &Arc<T>,
        bytes: &[u8],
    ) -> ClearOutcome {
        let layer = self.layer(kind);
        let outcome = layer.handshake.handle_clear(connection, bytes);

        if let ClearOutcome::Application(payload) = &outcome {
            let sender = ChannelKey::Identity(connection.id());
            let delivered = layer.connections.send_to_group(ALL_GROUP, payload.clone(), &[sender]);
            tracing::trace!(
                transport = kind.label(),
                identity = %connection.id(),
                delivered,
                "application payload relayed"
            );
        }
        outcome
    }

    /// Handle the single request of an encrypted connection.
    pub fn on_encrypted_message(
        &self,
        kind: TransportKind,
        connection: &Arc<T>,
        bytes: &[u8],
    ) -> EncryptedOutcome {
        let outcome = self.layer(kind).handshake.handle_encrypted(connection, bytes);
        tracing::debug!(
            transport = kind.label(),
            connection = %connection.id(),
            ?outcome,
            "encrypted request handled"
        );
        outcome
    }

    /// Bind `user` to the clear connection of `identity`.
    ///
    /// Returns `false` if `identity` has no registered connection.
    pub fn bind_user(&self, kind: TransportKind, user: &str, identity: ConnectionIdentity) -> bool {
        self.bind(kind, ChannelKey::User(user.to_string()), identity)
    }

    /// Bind login `session` to the clear connection of `identity`.
    pub fn bind_session(
        &self,
        kind: TransportKind,
        session: u64,
        identity: ConnectionIdentity,
    ) -> bool {
        self.bind(kind, ChannelKey::Session(session), identity)
    }

    fn bind(&self, kind: TransportKind, key: ChannelKey, identity: ConnectionIdentity) -> bool {
        let connections = &self.layer(kind).connections;
        let Some(connection) = connections.get(&ChannelKey::Identity(identity)) else {
            tracing::debug!(transport = kind.label(), %identity, ?key, "bind to unknown identity");
            return false;
        };
        connections.put(key, connection);
        true
    }

    /// Send `payload` to the connection under `key`, sealed for it.
    pub fn send_to(&self, kind: TransportKind, key: &ChannelKey, payload: Bytes) -> bool {
        self.layer(kind).connections.send_to(key, payload)
    }

    /// Send `payload` to every member of `group` except `except`.
    pub fn broadcast(
        &self,
        kind: TransportKind,
        group: &str,
        payload: Bytes,
        except: &[ChannelKey],
    ) -> usize {
        self.layer(kind).connections.send_to_group(group, payload, except)
    }

    /// Cancel pending timers, drop every key and close every connection.
    pub fn shutdown(&self) {
        for layer in [&self.socket, &self.websocket] {
            layer.handshake.shutdown();
            layer.connections.close_all();
        }
        self.pending.clear();
        self.keys.clear();
        tracing::info!("server state cleared");
    }
}
