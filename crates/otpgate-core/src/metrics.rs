//! In-process handshake counters.
//!
//! Purely observational: nothing in the handshake reads these back.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the handshake processor.
#[derive(Debug, Default)]
pub struct HandshakeMetrics {
    encrypt_ops: AtomicU64,
    decrypt_ops: AtomicU64,
    ambiguous_misses: AtomicU64,
    keys_issued: AtomicU64,
    keys_activated: AtomicU64,
    keys_deleted: AtomicU64,
    rejections: AtomicU64,
}

/// Point-in-time copy of [`HandshakeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Outbound payloads transformed with an active key
    pub encrypt_ops: u64,
    /// Inbound payloads transformed with a pending or active key
    pub decrypt_ops: u64,
    /// Pending-key decrypt attempts that did not yield an acknowledgement
    pub ambiguous_misses: u64,
    /// Keys generated and staged as pending
    pub keys_issued: u64,
    /// Pending keys promoted to active
    pub keys_activated: u64,
    /// Active keys revoked by request
    pub keys_deleted: u64,
    /// Pending keys removed by their expiry timer
    pub keys_expired: u64,
    /// Requests answered with a failure code or dropped
    pub rejections: u64,
}

impl HandshakeMetrics {
    pub(crate) fn record_encrypt(&self) {
        self.encrypt_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decrypt(&self) {
        self.decrypt_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ambiguous_miss(&self) {
        self.ambiguous_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_issued(&self) {
        self.keys_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_activated(&self) {
        self.keys_activated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deleted(&self) {
        self.keys_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter. `keys_expired` is owned by the pending registry.
    pub fn snapshot(&self, keys_expired: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            encrypt_ops: self.encrypt_ops.load(Ordering::Relaxed),
            decrypt_ops: self.decrypt_ops.load(Ordering::Relaxed),
            ambiguous_misses: self.ambiguous_misses.load(Ordering::Relaxed),
            keys_issued: self.keys_issued.load(Ordering::Relaxed),
            keys_activated: self.keys_activated.load(Ordering::Relaxed),
            keys_deleted: self.keys_deleted.load(Ordering::Relaxed),
            keys_expired,
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}
