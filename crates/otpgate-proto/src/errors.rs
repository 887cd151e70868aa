//! Protocol errors.
//!
//! Framing errors come from the socket transport's length-prefixed frames.
//! Decoding errors are split three ways so the handshake layer can tell a
//! broken handshake message (`Malformed`) from ordinary application traffic
//! (`UnknownType`) and from bytes that are not a message at all
//! (`Undecodable`, e.g. ciphertext under the wrong key).

use thiserror::Error;

use crate::messages::MessageKind;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing, encoding or decoding protocol data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than a frame header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Header magic does not match `OTPG`.
    #[error("invalid frame magic")]
    InvalidMagic,

    /// Header carries a protocol version we do not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds the protocol limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Protocol limit
        max: usize,
    },

    /// Header claims more payload than the buffer holds.
    #[error("frame truncated: expected {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload size claimed by the header
        expected: usize,
        /// Payload bytes actually present
        actual: usize,
    },

    /// Bytes are not a tagged message document.
    #[error("undecodable message: {0}")]
    Undecodable(String),

    /// Well-formed document whose `type` names no handshake message.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Handshake message with an invalid body.
    #[error("malformed {kind} message: {reason}")]
    Malformed {
        /// Message type named by the `type` tag
        kind: MessageKind,
        /// Decoder diagnostic
        reason: String,
    },

    /// Message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// True when the bytes claimed to be a handshake message but were invalid.
    ///
    /// Only these errors are protocol violations. `Undecodable` and
    /// `UnknownType` are what ordinary application traffic looks like to the
    /// handshake layer.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_is_a_violation() {
        let malformed = ProtocolError::Malformed {
            kind: MessageKind::KeyRequest,
            reason: "missing field".to_string(),
        };
        assert!(malformed.is_violation());
        assert!(!ProtocolError::UnknownType("Chat".to_string()).is_violation());
        assert!(!ProtocolError::Undecodable("eof".to_string()).is_violation());
    }

    #[test]
    fn display_names_the_message_kind() {
        let err = ProtocolError::Malformed {
            kind: MessageKind::KeyAck,
            reason: "invalid type: string".to_string(),
        };
        assert_eq!(err.to_string(), "malformed KeyAck message: invalid type: string");
    }
}
