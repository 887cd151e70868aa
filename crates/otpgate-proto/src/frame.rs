//! Frame type combining header and payload.
//!
//! A `Frame` is the raw socket transport's unit of delivery:
//! `[FrameHeader: 12 bytes] + [payload: variable bytes]`. The payload is an
//! encoded [`Message`](crate::Message) or application document, possibly
//! XOR'd with the connection's active key. Frames never look inside it.

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete transport frame.
///
/// # Invariants
///
/// - Size Consistency: `payload.len()` matches `header.payload_size()`.
///   Enforced by [`Frame::new`] and verified by [`Frame::decode`].
/// - Size Limit: `payload.len()` never exceeds
///   [`FrameHeader::MAX_PAYLOAD_SIZE`]. Oversized frames are rejected by
///   [`Frame::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (12 bytes)
    pub header: FrameHeader,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame around `payload`, filling in the header's size field.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds the limit
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();

        let payload_len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= FrameHeader::MAX_PAYLOAD_SIZE)
            .ok_or(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            })?;

        let mut header = FrameHeader::new();
        header.payload_size = payload_len.to_be_bytes();

        Ok(Self { header, payload })
    }

    /// Total encoded length (header + payload).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer.
    ///
    /// Writes: `[header (12 bytes)] + [payload (variable)]`
    pub fn encode(&self, dst: &mut impl BufMut) {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Decode frame from wire format.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if header parsing fails (invalid magic, version, or
    ///   size limits)
    /// - `ProtocolError::FrameTruncated` if payload is truncated (fewer bytes
    ///   than header claims)
    ///
    /// Trailing bytes after the announced payload are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        let Some(payload) = bytes.get(FrameHeader::SIZE..total_size) else {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        };

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sets_payload_size() {
        let frame = Frame::new(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(frame.header.payload_size(), 4);
        assert_eq!(frame.encoded_len(), FrameHeader::SIZE + 4);

        let mut wire = Vec::new();
        frame.encode(&mut wire);

        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn reject_truncated_frame() {
        let mut header = FrameHeader::new();
        header.payload_size = 100u32.to_be_bytes();

        let result = Frame::decode(&header.to_bytes());
        assert_eq!(result, Err(ProtocolError::FrameTruncated { expected: 100, actual: 0 }));
    }

    #[test]
    fn reject_oversized_payload() {
        let payload = vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1];
        assert!(matches!(Frame::new(payload), Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let frame = Frame::new(vec![9, 9]).unwrap();
        let mut wire = Vec::new();
        frame.encode(&mut wire);
        wire.extend_from_slice(&[0xAA, 0xBB]);

        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed.payload.as_ref(), &[9, 9]);
    }
}
