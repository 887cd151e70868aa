//! Simulated protocol client.
//!
//! Tracks the key state a real client keeps and builds the exact bytes it
//! would put on each channel, so tests can drive a [`HandshakeProcessor`]
//! end to end without sockets.
//!
//! [`HandshakeProcessor`]: otpgate_core::HandshakeProcessor

use otpgate_crypto::{CipherError, OtpKey, transform};
use otpgate_proto::{
    Codec, ConnectionIdentity, KeyAck, KeyRequest, Message, MessageKind, ProtocolError,
    ResponseCode,
};
use thiserror::Error;

/// Client-side failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Bytes did not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server sent unusable key material.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Server answered with a different message type.
    #[error("unexpected {0} message")]
    Unexpected(MessageKind),

    /// Server refused the request.
    #[error("request refused: {0}")]
    Refused(ResponseCode),

    /// An acknowledgement was requested with no key pending.
    #[error("no key pending")]
    NothingPending,
}

/// Client half of the handshake.
#[derive(Debug, Clone)]
pub struct SimClient<C> {
    codec: C,
    identity: ConnectionIdentity,
    active: Option<OtpKey>,
    pending: Option<OtpKey>,
}

impl<C: Codec> SimClient<C> {
    /// Client for a clear channel with a known identity.
    pub fn new(codec: C, identity: ConnectionIdentity) -> Self {
        Self { codec, identity, active: None, pending: None }
    }

    /// Client built from the server's `Welcome`.
    pub fn from_welcome(codec: C, welcome: &[u8]) -> Result<Self, ClientError> {
        match codec.decode(welcome)? {
            Message::Welcome(welcome) => Ok(Self::new(codec, welcome.identity)),
            other => Err(ClientError::Unexpected(other.kind())),
        }
    }

    /// Identity announced by the server.
    pub fn identity(&self) -> ConnectionIdentity {
        self.identity
    }

    /// Key the client currently encrypts with.
    pub fn active_key(&self) -> Option<&OtpKey> {
        self.active.as_ref()
    }

    /// Key received but not yet acknowledged.
    pub fn pending_key(&self) -> Option<&OtpKey> {
        self.pending.as_ref()
    }

    /// Plaintext `KeyRequest { NEW }` for the encrypted channel.
    pub fn new_key_request(&self, size: Option<u32>) -> Result<Vec<u8>, ClientError> {
        self.encode(&Message::KeyRequest(KeyRequest::new_key(self.identity, size)))
    }

    /// Plaintext `KeyRequest { DELETE }` for the encrypted channel.
    pub fn delete_request(&self) -> Result<Vec<u8>, ClientError> {
        self.encode(&Message::KeyRequest(KeyRequest::delete(self.identity)))
    }

    /// Stage the key carried by a `KeyResponse`.
    pub fn accept_key_response(&mut self, bytes: &[u8]) -> Result<&OtpKey, ClientError> {
        let response = match self.codec.decode(bytes)? {
            Message::KeyResponse(response) => response,
            other => return Err(ClientError::Unexpected(other.kind())),
        };

        match response.key_bytes {
            Some(bytes) if response.success => Ok(&*self.pending.insert(OtpKey::new(bytes)?)),
            _ => Err(ClientError::Refused(response.code)),
        }
    }

    /// `KeyAck` encrypted under the pending key; the client switches to that
    /// key immediately, as the server does on receipt.
    pub fn ack(&mut self) -> Result<Vec<u8>, ClientError> {
        let key = self.pending.take().ok_or(ClientError::NothingPending)?;
        let plain = self.encode(&Message::KeyAck(KeyAck { target_identity: self.identity }))?;
        let sealed = transform(&key, &plain);
        self.active = Some(key);
        Ok(sealed)
    }

    /// Drop the active key, as after a successful delete.
    pub fn forget_key(&mut self) {
        self.active = None;
    }

    /// Encode `message` and seal it for the clear channel.
    pub fn seal(&self, message: &Message) -> Result<Vec<u8>, ClientError> {
        Ok(self.seal_bytes(&self.encode(message)?))
    }

    /// Seal raw application bytes for the clear channel.
    pub fn seal_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        match &self.active {
            Some(key) => transform(key, bytes),
            None => bytes.to_vec(),
        }
    }

    /// Unseal raw bytes received on the clear channel.
    pub fn open_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        self.seal_bytes(bytes)
    }

    /// Unseal and decode a clear-channel message.
    pub fn open(&self, bytes: &[u8]) -> Result<Message, ClientError> {
        Ok(self.codec.decode(&self.open_bytes(bytes))?)
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, ClientError> {
        Ok(self.codec.encode(message)?)
    }
}
