//! Error types for the otpgate core.
//!
//! Registry and configuration errors fail fast with typed variants. Only the
//! handshake processor turns them into wire responses, through
//! [`HandshakeError::response_code`].

use std::time::Duration;

use otpgate_crypto::CipherError;
use otpgate_proto::{ConnectionIdentity, ProtocolError, ResponseCode};
use thiserror::Error;

/// Errors from registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An encrypted slot was offered a connection without transport security.
    #[error("connection {connection} is not transport-secured")]
    NotEncrypted {
        /// Offending connection
        connection: ConnectionIdentity,
    },

    /// No clear connection is paired with the identity.
    #[error("no clear channel for identity {0}")]
    NoClearChannel(ConnectionIdentity),

    /// No pending key for the identity.
    #[error("no pending key for identity {0}")]
    NoPendingKey(ConnectionIdentity),

    /// No active key for the identity.
    #[error("no active key for identity {0}")]
    NoActiveKey(ConnectionIdentity),
}

/// Errors raised while processing one handshake message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key generation or policy failure.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Registry lookup or update failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl HandshakeError {
    /// Stable wire code for this error.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::Protocol(err) if err.is_violation() => ResponseCode::MalformedRequest,
            Self::Protocol(_) => ResponseCode::Unexpected,
            Self::Cipher(CipherError::InvalidKeySize { .. }) => ResponseCode::InvalidKeySize,
            Self::Cipher(CipherError::EmptyKey) => ResponseCode::Unexpected,
            Self::Registry(RegistryError::NotEncrypted { .. }) => ResponseCode::NotEncrypted,
            Self::Registry(RegistryError::NoClearChannel(_)) => ResponseCode::NoClearChannel,
            Self::Registry(RegistryError::NoPendingKey(_)) => ResponseCode::NoPendingKey,
            Self::Registry(RegistryError::NoActiveKey(_)) => ResponseCode::NoActiveKey,
        }
    }
}

/// Invalid startup configuration. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Default or maximum key size is invalid.
    #[error("invalid key size configuration: {0}")]
    KeySize(#[from] CipherError),

    /// Pending-key expiry must be positive.
    #[error("pending key expiry must be greater than zero, got {0:?}")]
    ZeroExpiry(Duration),

    /// Encrypted-connection read timeout must be positive.
    #[error("encrypted read timeout must be greater than zero, got {0:?}")]
    ZeroReadTimeout(Duration),
}
