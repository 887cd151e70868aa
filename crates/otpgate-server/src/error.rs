//! Server error types.

use std::fmt;

use otpgate_core::ConfigError;
use otpgate_proto::ProtocolError;

/// Startup and per-connection failures of the network layer.
#[derive(Debug)]
pub enum ServerError {
    /// Bad bind address or unusable certificate material.
    ///
    /// Fatal at startup.
    Config(String),

    /// Handshake configuration rejected by validation.
    ///
    /// Fatal at startup, same as `Config`.
    Handshake(ConfigError),

    /// Socket, TLS or WebSocket I/O failure.
    ///
    /// Fatal for one connection, or for startup when a listener cannot bind.
    Transport(String),

    /// Protocol error (invalid frame header, oversized payload, etc.).
    ///
    /// Fatal for that connection only.
    Protocol(String),

    /// Internal error (listener task panicked or was cancelled).
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Handshake(err) => write!(f, "handshake configuration error: {err}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handshake(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Handshake(err)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
