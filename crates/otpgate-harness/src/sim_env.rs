//! Seeded simulation environment.

use std::{future::Future, sync::Arc, time::Duration};

use otpgate_core::Environment;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic environment for tests.
///
/// Randomness comes from a seeded ChaCha8 generator shared by every clone, so
/// a test run with the same seed generates the same keys. Time is Tokio time:
/// under `#[tokio::test(start_paused = true)]` the clock only moves when the
/// test advances it or every task is idle.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
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

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().fill_bytes(buffer);
    }
}
