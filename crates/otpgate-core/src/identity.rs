//! Connection identity assignment.

use std::sync::atomic::{AtomicU64, Ordering};

use otpgate_proto::ConnectionIdentity;

use crate::env::Environment;

/// Source of process-unique connection identities.
///
/// Invoked exactly once per accepted connection.
pub trait IdentityGenerator: Send + Sync + 'static {
    /// Next unused identity.
    fn next_identity(&self) -> ConnectionIdentity;
}

/// Monotonic identities starting at 1.
#[derive(Debug)]
pub struct SequentialIdentities {
    next: AtomicU64,
}

impl SequentialIdentities {
    /// Counter starting at 1.
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }
}

impl Default for SequentialIdentities {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGenerator for SequentialIdentities {
    fn next_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Random 64-bit identities drawn from the environment RNG.
///
/// Makes identities unguessable across connections. Collisions among live
/// connections are possible in principle but negligible at 64 bits.
#[derive(Debug, Clone)]
pub struct RandomIdentities<E> {
    env: E,
}

impl<E: Environment> RandomIdentities<E> {
    /// Identities drawn from `env`.
    pub fn new(env: E) -> Self {
        Self { env }
    }
}

impl<E: Environment> IdentityGenerator for RandomIdentities<E> {
    fn next_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::new(self.env.random_u64())
    }
}
