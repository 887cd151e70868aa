//! Stable response codes.
//!
//! Codes are part of the wire contract: clients switch on the number, humans
//! read the reason. Internal error types never cross the wire; the handshake
//! layer maps them onto one of these.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome code carried by every handshake response.
///
/// `1xxx` codes are request problems the client can fix, `11xx` codes mean a
/// piece of state the request depends on does not exist (yet, or any more),
/// and `1500` is reserved for failures the server did not anticipate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// Request succeeded.
    Ok,
    /// Handshake message could not be parsed.
    MalformedRequest,
    /// Key request without a `function`.
    MissingFunction,
    /// Requested key size violates the size policy.
    InvalidKeySize,
    /// Encrypted channel does not originate from the clear channel's host.
    HostMismatch,
    /// Key request arrived on a connection without transport security.
    NotEncrypted,
    /// Request names an identity other than the channel's own.
    IdentityMismatch,
    /// Request is not allowed on the channel it arrived on.
    WrongChannel,
    /// No pending key to acknowledge.
    NoPendingKey,
    /// No active key to delete.
    NoActiveKey,
    /// No clear channel registered for the requested identity.
    NoClearChannel,
    /// Unexpected server-side failure.
    Unexpected,
}

impl ResponseCode {
    /// Every code, in numeric order.
    pub const ALL: [Self; 12] = [
        Self::Ok,
        Self::MalformedRequest,
        Self::MissingFunction,
        Self::InvalidKeySize,
        Self::HostMismatch,
        Self::NotEncrypted,
        Self::IdentityMismatch,
        Self::WrongChannel,
        Self::NoPendingKey,
        Self::NoActiveKey,
        Self::NoClearChannel,
        Self::Unexpected,
    ];

    /// Numeric wire value.
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Ok => 0,
            Self::MalformedRequest => 1001,
            Self::MissingFunction => 1002,
            Self::InvalidKeySize => 1003,
            Self::HostMismatch => 1004,
            Self::NotEncrypted => 1005,
            Self::IdentityMismatch => 1006,
            Self::WrongChannel => 1007,
            Self::NoPendingKey => 1101,
            Self::NoActiveKey => 1102,
            Self::NoClearChannel => 1103,
            Self::Unexpected => 1500,
        }
    }

    /// Parse a numeric wire value. `None` for unassigned numbers.
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_u16() == value)
    }

    /// Human-readable reason sent alongside the code.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::MalformedRequest => "malformed request",
            Self::MissingFunction => "key request carries no function",
            Self::InvalidKeySize => "invalid key size",
            Self::HostMismatch => "encrypted channel host does not match clear channel host",
            Self::NotEncrypted => "channel is not transport encrypted",
            Self::IdentityMismatch => "request identity does not match channel identity",
            Self::WrongChannel => "request not allowed on this channel",
            Self::NoPendingKey => "no pending key for identity",
            Self::NoActiveKey => "no active key for identity",
            Self::NoClearChannel => "no clear channel for identity",
            Self::Unexpected => "unexpected error",
        }
    }

    /// True for [`ResponseCode::Ok`].
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.as_u16())
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

impl<'de> Deserialize<'de> for ResponseCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u16::deserialize(deserializer)?;
        Self::from_u16(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown response code {value}")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn numeric_values_are_unique_and_round_trip() {
        let mut seen = HashSet::new();
        for code in ResponseCode::ALL {
            assert!(seen.insert(code.as_u16()), "duplicate code {}", code.as_u16());
            assert_eq!(ResponseCode::from_u16(code.as_u16()), Some(code));
        }
    }

    #[test]
    fn unassigned_number_is_rejected() {
        assert_eq!(ResponseCode::from_u16(4242), None);
    }

    #[test]
    fn display_carries_reason_and_number() {
        assert_eq!(ResponseCode::NoPendingKey.to_string(), "no pending key for identity (1101)");
    }
}
