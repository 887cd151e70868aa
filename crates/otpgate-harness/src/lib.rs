//! Deterministic test harness for otpgate.
//!
//! - [`SimEnv`]: seeded RNG plus Tokio time, so a paused clock drives
//!   pending-key expiry
//! - [`MemoryTransport`]: records sends and fires close callbacks like a
//!   real adapter
//! - [`SimClient`]: the client half of the handshake, producing the bytes a
//!   real client puts on each channel

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory_transport;
pub mod sim_client;
pub mod sim_env;

pub use memory_transport::{LOOPBACK, MemoryTransport};
pub use sim_client::{ClientError, SimClient};
pub use sim_env::SimEnv;
