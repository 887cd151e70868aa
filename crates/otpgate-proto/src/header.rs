//! Frame header implementation with zero-copy parsing.
//!
//! The raw socket transport has no message boundaries of its own, so every
//! payload is preceded by a fixed 12-byte header (Big Endian). WebSocket
//! connections use the WebSocket framing instead and never see this header.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 12-byte frame header (Big Endian network byte order).
///
/// ```text
/// 0       4       5       8              12
/// ┌───────┬───────┬───────┬──────────────┐
/// │ magic │ vers. │ rsvd. │ payload_size │
/// └───────┴───────┴───────┴──────────────┘
/// ```
///
/// # Security
///
/// All 12-byte patterns are valid for the struct layout, so casting untrusted
/// network bytes is safe. Magic, version and payload size are validated in
/// [`FrameHeader::from_bytes`] before any payload memory is allocated.
///
/// The header is never encrypted. Only the payload it announces passes
/// through the cipher, which keeps the frame boundary recoverable regardless
/// of which key (if any) the peer used.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],   // 0x4F545047 ("OTPG" in ASCII)
    version: u8,      // 0x01
    reserved: [u8; 3],
    pub(crate) payload_size: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header (12 bytes)
    pub const SIZE: usize = 12;

    /// Magic number: "OTPG" in ASCII (0x4F545047)
    pub const MAGIC: u32 = 0x4F54_5047;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (1 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a header announcing an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            reserved: [0; 3],
            payload_size: [0; 4],
        }
    }

    /// Parse header from network bytes (zero-copy, safe).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 12 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if protocol version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes (zero-copy)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol version byte (currently 0x01).
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Length of the payload that follows the header.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self::new()
    }
}
