//! Time, randomness and task spawning behind one trait.
//!
//! Decouples handshake logic from system resources (time, randomness, task
//! spawning). Production uses Tokio and the OS RNG; tests use a seeded RNG and
//! Tokio's paused clock so expiry can be driven without waiting.

use std::{
    future::Future,
    ops::{Add, Sub},
    time::Duration,
};

/// Source of time, key material and background tasks.
///
/// # Invariants
///
/// Implementations guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - `spawn()` runs the future to completion unless the runtime shuts down
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Both production and simulation use `tokio::time::Instant` so that a
    /// paused Tokio clock drives expiry deadlines and timers alike.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + 'static
        + Add<Duration, Output = Self::Instant>
        + Sub<Output = Duration>;

    /// Monotonic now.
    fn now(&self) -> Self::Instant;

    /// Resolves after `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Runs `future` in the background.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Fill `buffer` with key-grade random bytes.
    ///
    /// # Invariants
    ///
    /// - A seeded implementation yields the same stream for the same seed
    /// - Uses cryptographically secure RNG in production
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Eight random bytes as a big-endian `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
