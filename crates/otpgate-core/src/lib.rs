//! Otpgate Core
//!
//! Registries and the key-rotation state machine behind otpgate's "one-time
//! pad over a clear channel". Transport-agnostic: every connection kind is
//! consumed through the [`Transport`] trait, and time, randomness and task
//! spawning come from an [`Environment`] so tests can run on a seeded RNG and
//! a paused clock.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────┐
//!  clear ────► │  HandshakeProcessor  │ ◄──── encrypted (TLS, one request)
//!              └──────────┬───────────┘
//!        ┌────────────────┼──────────────────┬─────────────────────┐
//!        ▼                ▼                  ▼                     ▼
//!   KeyRegistry   PendingKeyRegistry   ChannelPairRegistry   ClearCipher ──► ConnectionRegistry
//!   (active)      (expiring)           (clear ↔ encrypted)   (per-recipient seal)
//! ```
//!
//! # Invariants
//!
//! - At most one active and one pending key per identity
//! - An active key only ever comes from promoting the pending key
//! - Keys are replaced wholesale, never edited
//! - Closing a connection removes it from every registry before any later
//!   lookup can observe it

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod metrics;
pub mod registry;
pub mod transport;

pub use config::HandshakeConfig;
pub use env::Environment;
pub use error::{ConfigError, HandshakeError, RegistryError};
pub use handshake::{
    ClearCipher, ClearOutcome, EncryptedOutcome, HandshakeProcessor, HandshakeState,
};
pub use identity::{IdentityGenerator, RandomIdentities, SequentialIdentities};
pub use metrics::{HandshakeMetrics, MetricsSnapshot};
pub use registry::{
    ALL_GROUP, ChannelPairRegistry, ChannelRole, ConnectionRegistry, KeyRegistry, OutboundTransform,
    PendingKeyRegistry,
};
pub use transport::{CloseCallback, Lifecycle, Transport, TransportError};
