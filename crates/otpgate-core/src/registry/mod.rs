//! Registries shared by the handshake and message delivery.

mod connections;
mod keys;
mod pairs;
mod pending;

pub use connections::{ALL_GROUP, ConnectionRegistry, OutboundTransform};
pub use keys::KeyRegistry;
pub use pairs::{ChannelPairRegistry, ChannelRole};
pub use pending::PendingKeyRegistry;
