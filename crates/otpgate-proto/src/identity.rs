//! Connection identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-unique identity assigned to a connection when it is accepted.
///
/// Every registry is keyed by this value. Identities are never reused within a
/// process lifetime, so a stale identity can only ever miss a lookup, never hit
/// somebody else's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionIdentity(u64);

impl ConnectionIdentity {
    /// Wrap a raw identity value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw identity value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionIdentity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
