//! Key size policy.
//!
//! Sizes must be positive powers of two no larger than the configured
//! maximum. Power-of-two keys keep the XOR cycle aligned with the 8/16/32/64
//! byte boundaries clients vectorize over.

use crate::error::CipherError;

/// Key size handed out when a request does not name one.
pub const DEFAULT_KEY_SIZE: usize = 64;

/// Largest key size accepted by default.
pub const MAX_KEY_SIZE: usize = 4096;

/// Validated default and maximum key sizes.
///
/// # Invariants
///
/// - `default_size` and `max_size` are powers of two
/// - `default_size <= max_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySizePolicy {
    default_size: usize,
    max_size: usize,
}

impl KeySizePolicy {
    /// Build a policy, validating both sizes.
    ///
    /// # Errors
    ///
    /// - `CipherError::InvalidKeySize` if either size is zero or not a power
    ///   of two, or if the default exceeds the maximum
    pub fn new(default_size: usize, max_size: usize) -> Result<Self, CipherError> {
        check_power_of_two(max_size)?;
        check_power_of_two(default_size)?;

        if default_size > max_size {
            return Err(CipherError::InvalidKeySize {
                size: default_size,
                reason: "default size exceeds maximum size",
            });
        }

        Ok(Self { default_size, max_size })
    }

    /// Size used when a request does not name one.
    pub fn default_size(&self) -> usize {
        self.default_size
    }

    /// Largest size this policy accepts.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Validate `size` against the policy.
    pub fn validate(&self, size: usize) -> Result<usize, CipherError> {
        check_power_of_two(size)?;

        if size > self.max_size {
            return Err(CipherError::InvalidKeySize { size, reason: "exceeds maximum key size" });
        }

        Ok(size)
    }

    /// Resolve an optional requested size: the default when absent, otherwise
    /// the validated request.
    pub fn resolve(&self, requested: Option<u32>) -> Result<usize, CipherError> {
        match requested {
            None => Ok(self.default_size),
            Some(size) => self.validate(size as usize),
        }
    }
}

impl Default for KeySizePolicy {
    fn default() -> Self {
        Self { default_size: DEFAULT_KEY_SIZE, max_size: MAX_KEY_SIZE }
    }
}

fn check_power_of_two(size: usize) -> Result<(), CipherError> {
    if size == 0 {
        return Err(CipherError::InvalidKeySize { size, reason: "must be positive" });
    }
    if !size.is_power_of_two() {
        return Err(CipherError::InvalidKeySize { size, reason: "must be a power of two" });
    }
    Ok(())
}
