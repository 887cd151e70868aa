//! Key material.

use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{error::CipherError, policy::KeySizePolicy};

/// Number of digest bytes shown by [`OtpKey::fingerprint`].
const FINGERPRINT_LEN: usize = 8;

/// Immutable XOR key.
///
/// # Invariants
///
/// - Key bytes are never empty
/// - Key bytes are never modified after construction; rotation builds a new
///   `OtpKey` and swaps it in wholesale
///
/// # Security
///
/// Bytes are zeroized on drop. `Debug` prints only the length and the
/// fingerprint so keys cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl OtpKey {
    /// Wrap existing key material.
    ///
    /// # Errors
    ///
    /// - `CipherError::EmptyKey` if `bytes` is empty
    pub fn new(bytes: Vec<u8>) -> Result<Self, CipherError> {
        if bytes.is_empty() {
            return Err(CipherError::EmptyKey);
        }
        Ok(Self { bytes: Zeroizing::new(bytes) })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; present for API symmetry with slices.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short, stable, non-reversible identifier for logs.
    ///
    /// Hex of the first 8 bytes of the key's SHA-256 digest.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes.as_slice());
        digest.iter().take(FINGERPRINT_LEN).map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for OtpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpKey")
            .field("len", &self.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Generate a key of `size` bytes.
///
/// `fill` must write cryptographically secure random bytes into the whole
/// buffer in production. Tests pass a seeded generator.
///
/// # Errors
///
/// - `CipherError::InvalidKeySize` if `size` violates `policy`
pub fn generate_key(
    size: usize,
    policy: &KeySizePolicy,
    fill: impl FnOnce(&mut [u8]),
) -> Result<OtpKey, CipherError> {
    let size = policy.validate(size)?;

    let mut bytes = Zeroizing::new(vec![0u8; size]);
    fill(&mut bytes);

    Ok(OtpKey { bytes })
}
