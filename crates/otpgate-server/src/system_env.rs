//! Production Environment implementation using Tokio time and the OS RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait.
//! Time is `tokio::time::Instant`, so pending-key deadlines and their timers
//! read the same clock.

use std::{future::Future, time::Duration};

use otpgate_core::Environment;

/// Production environment using Tokio time and cryptographic RNG.
///
/// # Security
///
/// The RNG uses getrandom which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux, `BCryptGenRandom` on Windows). Every key
/// byte handed to a client comes from here.
///
/// # Panics
///
/// Panics if the OS RNG fails. A server that cannot produce key material
/// must not keep issuing keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - server cannot issue keys");
    }
}
