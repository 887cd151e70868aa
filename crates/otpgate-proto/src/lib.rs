//! Otpgate wire protocol.
//!
//! Everything that crosses the network lives here: the handshake messages
//! exchanged during key rotation, the stable response codes reported back to
//! clients, the [`Codec`] used to turn messages into bytes, and the
//! length-prefixed [`Frame`] used by the raw socket transport.
//!
//! # Channels
//!
//! A client holds two kinds of connection:
//!
//! ```text
//!  clear channel (long-lived)            encrypted channel (one-shot, TLS)
//!  ──────────────────────────            ─────────────────────────────────
//!  <- Welcome { identity }
//!                                        -> KeyRequest { NEW, identity }
//!                                        <- KeyResponse { keyBytes }
//!                                           (server closes)
//!  -> KeyAck { identity }    (new key)
//!  <- AckResponse            (new key)
//!  ... game traffic XOR'd with the active key ...
//!  -> KeyRequest { DELETE }  (active key)
//!  <- DeleteResponse         (cleartext)
//! ```
//!
//! The cipher is applied to message bytes only. Frame headers and WebSocket
//! framing always travel in the clear.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod header;
pub mod identity;
pub mod messages;
pub mod response_code;

pub use codec::{CborCodec, Codec, JsonCodec};
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use identity::ConnectionIdentity;
pub use messages::{
    AckResponse, DeleteResponse, ErrorResponse, KeyAck, KeyFunction, KeyRequest, KeyResponse,
    Message, MessageKind, Welcome,
};
pub use response_code::ResponseCode;
