//! Cipher errors.

use thiserror::Error;

/// Errors from key construction and the size policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Key material is empty; XOR with an empty key is undefined.
    #[error("key must not be empty")]
    EmptyKey,

    /// Requested key size violates the size policy.
    #[error("invalid key size {size}: {reason}")]
    InvalidKeySize {
        /// Requested size in bytes
        size: usize,
        /// Which constraint was violated
        reason: &'static str,
    },
}
