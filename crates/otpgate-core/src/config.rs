//! Handshake configuration.

use std::time::Duration;

use otpgate_crypto::{DEFAULT_KEY_SIZE, KeySizePolicy, MAX_KEY_SIZE};

use crate::error::ConfigError;

/// Default lifetime of a pending key.
pub const DEFAULT_PENDING_EXPIRY: Duration = Duration::from_secs(30);

/// Default time an encrypted connection gets to send its single request.
pub const DEFAULT_ENCRYPTED_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for the key-rotation handshake.
///
/// Validated once at startup; an invalid configuration prevents the server
/// from binding any listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Key size used when a request does not name one (power of two).
    pub default_key_size: usize,
    /// Largest key size a request may ask for (power of two).
    pub max_key_size: usize,
    /// How long a generated key waits for its acknowledgement.
    pub pending_expiry: Duration,
    /// How long an encrypted connection may stay silent before it is dropped.
    pub encrypted_read_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            default_key_size: DEFAULT_KEY_SIZE,
            max_key_size: MAX_KEY_SIZE,
            pending_expiry: DEFAULT_PENDING_EXPIRY,
            encrypted_read_timeout: DEFAULT_ENCRYPTED_READ_TIMEOUT,
        }
    }
}

impl HandshakeConfig {
    /// Check every field, returning the key size policy on success.
    pub fn validate(&self) -> Result<KeySizePolicy, ConfigError> {
        if self.pending_expiry.is_zero() {
            return Err(ConfigError::ZeroExpiry(self.pending_expiry));
        }
        if self.encrypted_read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout(self.encrypted_read_timeout));
        }
        Ok(KeySizePolicy::new(self.default_key_size, self.max_key_size)?)
    }
}
