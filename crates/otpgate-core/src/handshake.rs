//! OTP key-rotation handshake.
//!
//! The processor drives the protocol for both channel roles against the
//! [`Transport`] contract, so every transport kind shares one state machine.
//!
//! # States (per identity)
//!
//! ```text
//!               KeyRequest NEW (encrypted)          KeyAck (clear, new key)
//! Unencrypted ───────────────────────────► KeyPending ───────────────────► Encrypted
//!      ▲              expiry / close           │                             │  │
//!      └───────────────────────────────────────┘                             │  │
//!      ▲                  KeyRequest DELETE (clear or encrypted)             │  │
//!      └─────────────────────────────────────────────────────────────────────┘  │
//!                                   KeyRequest NEW                               ▼
//!                           Encrypted ◄─────── KeyAck ─────────────────────── Rotating
//! ```
//!
//! # Ambiguous acknowledgement
//!
//! While a key is pending the server cannot know whether the client already
//! switched to it: the acknowledgement itself is the switch signal and is
//! sent under the new key. Inbound clear bytes are therefore first decrypted
//! with the pending key; only a well-formed `KeyAck` counts. Anything else
//! falls back to the active key, or to plaintext when there is none.
//!
//! # Failures
//!
//! Encrypted connections are one-shot: every request closes them, and
//! protocol violations (undecodable request, host mismatch, missing TLS)
//! close them without a reply. Clear connections are long-lived: violations
//! are answered with a typed failure and the connection stays open. A failed
//! request never alters the active key.

use std::sync::Arc;

use bytes::Bytes;
use otpgate_crypto::{KeySizePolicy, OtpKey, generate_key, transform};
use otpgate_proto::{
    AckResponse, Codec, ConnectionIdentity, DeleteResponse, ErrorResponse, KeyAck, KeyFunction,
    KeyRequest, KeyResponse, Message, ResponseCode, Welcome,
};

use crate::{
    env::Environment,
    error::{HandshakeError, RegistryError},
    metrics::{HandshakeMetrics, MetricsSnapshot},
    registry::{ChannelPairRegistry, KeyRegistry, OutboundTransform, PendingKeyRegistry},
    transport::Transport,
};

/// Handshake position of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No active and no pending key
    Unencrypted,
    /// A key awaits acknowledgement; traffic is still plaintext
    KeyPending,
    /// Traffic is transformed with the active key
    Encrypted,
    /// A new key awaits acknowledgement while the old key stays in force
    Rotating,
}

/// Result of handling one clear-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The pending key became the active key.
    Activated,
    /// The active key was revoked.
    Deleted,
    /// A failure response with this code was sent; state is unchanged.
    Rejected(ResponseCode),
    /// Not a handshake message; the decrypted payload for the application.
    Application(Bytes),
}

/// Result of handling the single request of an encrypted connection.
///
/// The connection is closed in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptedOutcome {
    /// A new key was staged and sent.
    KeyIssued,
    /// The active key was revoked.
    KeyDeleted,
    /// A failure response with this code was sent.
    Rejected(ResponseCode),
    /// Protocol violation; closed without a reply.
    Dropped(ResponseCode),
}

/// Encrypts outbound clear-channel payloads under each recipient's active key.
#[derive(Clone)]
pub struct ClearCipher {
    keys: KeyRegistry,
    metrics: Arc<HandshakeMetrics>,
}

impl ClearCipher {
    /// Cipher over `keys`, counting into `metrics`.
    pub fn new(keys: KeyRegistry, metrics: Arc<HandshakeMetrics>) -> Self {
        Self { keys, metrics }
    }

    /// `payload` transformed with `identity`'s active key, or unchanged.
    pub fn seal(&self, identity: ConnectionIdentity, payload: &Bytes) -> Bytes {
        match self.keys.apply(identity, payload) {
            Some(sealed) => {
                self.metrics.record_encrypt();
                Bytes::from(sealed)
            },
            None => payload.clone(),
        }
    }
}

impl OutboundTransform for ClearCipher {
    fn apply(&self, recipient: ConnectionIdentity, payload: &Bytes) -> Bytes {
        self.seal(recipient, payload)
    }
}

/// The key-rotation state machine.
///
/// Clone shares every registry. Handlers are synchronous: a connection's next
/// message is not processed until the previous call returns, which serializes
/// transitions per identity while identities proceed in parallel.
pub struct HandshakeProcessor<T, C, E: Environment> {
    env: E,
    codec: C,
    policy: KeySizePolicy,
    keys: KeyRegistry,
    pending: PendingKeyRegistry<E>,
    pairs: ChannelPairRegistry<T>,
    metrics: Arc<HandshakeMetrics>,
}

impl<T, C: Clone, E: Environment> Clone for HandshakeProcessor<T, C, E> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            codec: self.codec.clone(),
            policy: self.policy,
            keys: self.keys.clone(),
            pending: self.pending.clone(),
            pairs: self.pairs.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<T, C, E> HandshakeProcessor<T, C, E>
where
    T: Transport,
    C: Codec,
    E: Environment,
{
    /// Processor over shared key registries and its own channel pairs.
    pub fn new(
        env: E,
        codec: C,
        policy: KeySizePolicy,
        keys: KeyRegistry,
        pending: PendingKeyRegistry<E>,
    ) -> Self {
        Self {
            env,
            codec,
            policy,
            keys,
            pending,
            pairs: ChannelPairRegistry::new(),
            metrics: Arc::default(),
        }
    }

    /// Active key registry.
    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    /// Pending key registry.
    pub fn pending(&self) -> &PendingKeyRegistry<E> {
        &self.pending
    }

    /// Channel pair registry.
    pub fn pairs(&self) -> &ChannelPairRegistry<T> {
        &self.pairs
    }

    /// Message codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Outbound transform for connection registries carrying clear traffic.
    pub fn clear_cipher(&self) -> ClearCipher {
        ClearCipher::new(self.keys.clone(), Arc::clone(&self.metrics))
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.pending.expired_total())
    }

    /// Current state of `identity`.
    pub fn state(&self, identity: ConnectionIdentity) -> HandshakeState {
        match (self.keys.contains(identity), self.pending.contains(identity)) {
            (false, false) => HandshakeState::Unencrypted,
            (false, true) => HandshakeState::KeyPending,
            (true, false) => HandshakeState::Encrypted,
            (true, true) => HandshakeState::Rotating,
        }
    }

    /// Adopt a freshly accepted clear connection.
    ///
    /// Pairs it under its own identity, arranges for its keys to be destroyed
    /// when it closes, and sends `Welcome` in the clear.
    pub fn attach_clear(&self, connection: &Arc<T>) {
        let identity = connection.id();
        self.pairs.set_clear(identity, Arc::clone(connection));

        let keys = self.keys.clone();
        let pending = self.pending.clone();
        connection.on_close(Box::new(move || {
            let had_key = keys.remove(identity).is_some();
            let had_pending = pending.remove(identity).is_some();
            tracing::debug!(%identity, had_key, had_pending, "clear channel closed, keys dropped");
        }));

        match self.codec.encode(&Message::Welcome(Welcome { identity })) {
            Ok(bytes) => self.deliver(connection, Bytes::from(bytes)),
            Err(e) => tracing::error!(%identity, "failed to encode welcome: {e}"),
        }
    }

    /// Seal `payload` for `identity`'s clear channel.
    pub fn seal_outbound(&self, identity: ConnectionIdentity, payload: &Bytes) -> Bytes {
        self.clear_cipher().seal(identity, payload)
    }

    /// Send an application payload over a clear connection, sealed with its
    /// active key if it has one.
    pub fn send_clear(&self, connection: &Arc<T>, payload: &Bytes) {
        let sealed = self.seal_outbound(connection.id(), payload);
        self.deliver(connection, sealed);
    }

    /// Handle the single request of an encrypted connection, then close it.
    pub fn handle_encrypted(&self, connection: &Arc<T>, bytes: &[u8]) -> EncryptedOutcome {
        let outcome = match self.process_encrypted(connection, bytes) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(connection = %connection.id(), "key request failed: {e}");
                let code = e.response_code();
                self.reply(connection, &Message::KeyResponse(KeyResponse::failure(code)));
                EncryptedOutcome::Rejected(code)
            },
        };

        if !matches!(outcome, EncryptedOutcome::KeyIssued | EncryptedOutcome::KeyDeleted) {
            self.metrics.record_rejection();
        }
        connection.close();
        outcome
    }

    /// Handle one inbound message of a clear connection.
    pub fn handle_clear(&self, connection: &Arc<T>, bytes: &[u8]) -> ClearOutcome {
        let identity = connection.id();
        let outcome = match self.process_clear(connection, bytes) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(%identity, "clear message failed: {e}");
                let code = e.response_code();
                self.respond_clear(connection, &Message::ErrorResponse(ErrorResponse::new(code)));
                ClearOutcome::Rejected(code)
            },
        };

        if matches!(outcome, ClearOutcome::Rejected(_)) {
            self.metrics.record_rejection();
        }
        outcome
    }

    /// Cancel every pending timer and drop all key and pair state.
    pub fn shutdown(&self) {
        self.pending.clear();
        self.keys.clear();
        self.pairs.clear();
    }

    fn process_encrypted(
        &self,
        connection: &Arc<T>,
        bytes: &[u8],
    ) -> Result<EncryptedOutcome, HandshakeError> {
        let connection_id = connection.id();

        let request = match self.codec.decode(bytes) {
            Ok(Message::KeyRequest(request)) => request,
            Ok(other) => {
                tracing::warn!(
                    connection = %connection_id,
                    kind = %other.kind(),
                    "unexpected message on encrypted channel"
                );
                return Ok(EncryptedOutcome::Dropped(ResponseCode::MalformedRequest));
            },
            Err(e) => {
                tracing::warn!(connection = %connection_id, "undecodable key request: {e}");
                return Ok(EncryptedOutcome::Dropped(ResponseCode::MalformedRequest));
            },
        };

        if !connection.is_secure() {
            tracing::warn!(connection = %connection_id, "key request over insecure transport");
            return Ok(EncryptedOutcome::Dropped(ResponseCode::NotEncrypted));
        }

        let Some(function) = request.function else {
            return Ok(self.reject_encrypted(connection, ResponseCode::MissingFunction));
        };
        let Some(target) = request.target_identity else {
            return Ok(self.reject_encrypted(connection, ResponseCode::MalformedRequest));
        };

        if self.pairs.clear_of(target).is_none() {
            tracing::debug!(%target, "key request for identity without clear channel");
            return Ok(self.reject_encrypted(connection, ResponseCode::NoClearChannel));
        }

        // Decided on this connection's own address, before it enters the pair
        if !self.pairs.host_matches_clear(target, connection.remote_addr()) {
            tracing::warn!(
                %target,
                connection = %connection_id,
                remote = %connection.remote_addr(),
                "encrypted channel host does not match clear channel, dropping"
            );
            return Ok(EncryptedOutcome::Dropped(ResponseCode::HostMismatch));
        }
        self.pairs.set_encrypted(target, Arc::clone(connection))?;

        match function {
            KeyFunction::New => self.issue_key(connection, target, &request),
            KeyFunction::Delete => {
                let code = self.delete_key(target);
                if code.is_ok() {
                    self.respond_clear_to(target, &Message::DeleteResponse(DeleteResponse::ok()));
                    Ok(EncryptedOutcome::KeyDeleted)
                } else {
                    self.reply(connection, &Message::DeleteResponse(DeleteResponse::failure(code)));
                    Ok(EncryptedOutcome::Rejected(code))
                }
            },
        }
    }

    fn issue_key(
        &self,
        connection: &Arc<T>,
        target: ConnectionIdentity,
        request: &KeyRequest,
    ) -> Result<EncryptedOutcome, HandshakeError> {
        let size = match self.policy.resolve(request.requested_size) {
            Ok(size) => size,
            Err(e) => {
                tracing::debug!(%target, "rejecting key request: {e}");
                return Ok(self.reject_encrypted(connection, ResponseCode::InvalidKeySize));
            },
        };

        let key = generate_key(size, &self.policy, |buf| self.env.random_bytes(buf))?;
        let issued = KeyResponse::issued(key.as_bytes().to_vec());
        let response = self.codec.encode(&Message::KeyResponse(issued))?;

        let fingerprint = key.fingerprint();
        self.pending.put(target, key);

        // The clear channel may have closed, and run its cleanup, since the check above
        if self.pairs.clear_of(target).is_none() {
            self.pending.remove(target);
            tracing::debug!(%target, "clear channel closed while issuing key");
            return Ok(self.reject_encrypted(connection, ResponseCode::NoClearChannel));
        }
        self.metrics.record_issued();
        tracing::info!(%target, size, %fingerprint, "new key staged");

        self.deliver(connection, Bytes::from(response));
        Ok(EncryptedOutcome::KeyIssued)
    }

    fn process_clear(
        &self,
        connection: &Arc<T>,
        bytes: &[u8],
    ) -> Result<ClearOutcome, HandshakeError> {
        let identity = connection.id();

        if let Some(pending) = self.pending.get(identity) {
            self.metrics.record_decrypt();
            let candidate = transform(&pending, bytes);
            if let Ok(Message::KeyAck(ack)) = self.codec.decode(&candidate) {
                return Ok(self.activate(connection, &ack, &pending));
            }
            self.metrics.record_ambiguous_miss();
            tracing::trace!(%identity, "not an acknowledgement under the pending key");
        }

        if let Some(retired) = self.pending.retired(identity) {
            self.metrics.record_decrypt();
            if let Ok(Message::KeyAck(_)) = self.codec.decode(&transform(&retired, bytes)) {
                tracing::debug!(%identity, "acknowledgement for an expired or replaced key");
                return Ok(self.reject_ack(connection, ResponseCode::NoPendingKey));
            }
        }

        let plaintext = match self.keys.get(identity) {
            Some(active) => {
                self.metrics.record_decrypt();
                transform(&active, bytes)
            },
            None => bytes.to_vec(),
        };

        match self.codec.decode(&plaintext) {
            Ok(Message::KeyRequest(request)) => Ok(self.clear_key_request(connection, &request)),
            Ok(Message::KeyAck(_)) => Ok(self.reject_ack(connection, ResponseCode::NoPendingKey)),
            Ok(other) => {
                tracing::debug!(%identity, kind = %other.kind(), "server message on clear channel");
                Ok(self.reject_clear(connection, ResponseCode::WrongChannel))
            },
            Err(e) if e.is_violation() => {
                tracing::debug!(%identity, "malformed handshake message: {e}");
                Ok(self.reject_clear(connection, ResponseCode::MalformedRequest))
            },
            Err(_) => Ok(ClearOutcome::Application(Bytes::from(plaintext))),
        }
    }

    fn activate(
        &self,
        connection: &Arc<T>,
        ack: &KeyAck,
        pending: &Arc<OtpKey>,
    ) -> ClearOutcome {
        let identity = connection.id();
        if ack.target_identity != identity {
            tracing::warn!(
                %identity,
                claimed = %ack.target_identity,
                "acknowledgement names another identity"
            );
            return self.reject_ack(connection, ResponseCode::IdentityMismatch);
        }

        let Some(key) = self.pending.take_if(identity, pending) else {
            return self.reject_ack(connection, ResponseCode::NoPendingKey);
        };

        let fingerprint = key.fingerprint();
        let rotated = self.keys.put(identity, key).is_some();
        self.metrics.record_activated();
        tracing::info!(%identity, %fingerprint, rotated, "key activated");

        self.respond_clear(connection, &Message::AckResponse(AckResponse::ok()));
        ClearOutcome::Activated
    }

    fn clear_key_request(&self, connection: &Arc<T>, request: &KeyRequest) -> ClearOutcome {
        let identity = connection.id();
        match request.function {
            Some(KeyFunction::Delete) => {
                if request.target_identity != Some(identity) {
                    tracing::warn!(
                        %identity,
                        claimed = ?request.target_identity,
                        "delete request names another identity"
                    );
                    return self.reject_delete(connection, ResponseCode::IdentityMismatch);
                }

                let code = self.delete_key(identity);
                if !code.is_ok() {
                    return self.reject_delete(connection, code);
                }
                self.respond_clear(connection, &Message::DeleteResponse(DeleteResponse::ok()));
                ClearOutcome::Deleted
            },
            Some(KeyFunction::New) => self.reject_clear(connection, ResponseCode::WrongChannel),
            None => self.reject_clear(connection, ResponseCode::MissingFunction),
        }
    }

    fn delete_key(&self, identity: ConnectionIdentity) -> ResponseCode {
        match self.keys.remove(identity) {
            Some(key) => {
                self.metrics.record_deleted();
                tracing::info!(%identity, fingerprint = %key.fingerprint(), "key deleted");
                ResponseCode::Ok
            },
            None => {
                let err = RegistryError::NoActiveKey(identity);
                tracing::debug!(%identity, "delete rejected: {err}");
                HandshakeError::from(err).response_code()
            },
        }
    }

    fn reject_encrypted(&self, connection: &Arc<T>, code: ResponseCode) -> EncryptedOutcome {
        self.reply(connection, &Message::KeyResponse(KeyResponse::failure(code)));
        EncryptedOutcome::Rejected(code)
    }

    fn reject_ack(&self, connection: &Arc<T>, code: ResponseCode) -> ClearOutcome {
        self.respond_clear(connection, &Message::AckResponse(AckResponse::failure(code)));
        ClearOutcome::Rejected(code)
    }

    fn reject_delete(&self, connection: &Arc<T>, code: ResponseCode) -> ClearOutcome {
        self.respond_clear(connection, &Message::DeleteResponse(DeleteResponse::failure(code)));
        ClearOutcome::Rejected(code)
    }

    fn reject_clear(&self, connection: &Arc<T>, code: ResponseCode) -> ClearOutcome {
        self.respond_clear(connection, &Message::ErrorResponse(ErrorResponse::new(code)));
        ClearOutcome::Rejected(code)
    }

    /// Encode `message` and send it over a clear connection under whatever
    /// key is active at this moment.
    fn respond_clear(&self, connection: &Arc<T>, message: &Message) {
        match self.codec.encode(message) {
            Ok(bytes) => self.send_clear(connection, &Bytes::from(bytes)),
            Err(e) => {
                tracing::error!(connection = %connection.id(), "failed to encode response: {e}");
            },
        }
    }

    fn respond_clear_to(&self, identity: ConnectionIdentity, message: &Message) {
        match self.pairs.clear_of(identity) {
            Some(clear) => self.respond_clear(&clear, message),
            None => tracing::warn!(%identity, "clear channel gone before response"),
        }
    }

    /// Encode `message` and send it unmodified.
    fn reply(&self, connection: &Arc<T>, message: &Message) {
        match self.codec.encode(message) {
            Ok(bytes) => self.deliver(connection, Bytes::from(bytes)),
            Err(e) => tracing::error!(connection = %connection.id(), "failed to encode reply: {e}"),
        }
    }

    fn deliver(&self, connection: &Arc<T>, payload: Bytes) {
        if let Err(e) = connection.send(payload) {
            tracing::warn!(connection = %connection.id(), "dropping response: {e}");
        }
    }
}
