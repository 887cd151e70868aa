//! Otpgate Cryptographic Primitives
//!
//! The "one-time pad" used on otpgate clear channels: a repeating-key XOR
//! stream keyed per connection, plus the key generation and size policy that
//! feed it. Pure functions with deterministic outputs. Callers provide random
//! bytes for deterministic testing.
//!
//! # Key Lifecycle
//!
//! ```text
//! KeySizePolicy::resolve(requested)
//!        │
//!        ▼
//! generate_key(size, fill) → OtpKey (pending)
//!        │  acknowledged by client
//!        ▼
//! OtpKey (active) ── transform() on every clear-channel payload
//!        │  DELETE or connection close
//!        ▼
//! dropped → zeroized
//! ```
//!
//! # Security
//!
//! This is not a general purpose cipher. The key repeats every `len` bytes
//! and is reused for every message of a session, so it offers confidentiality
//! against passive observers of a single session only. It provides no
//! integrity protection and no resistance to traffic analysis.
//!
//! - Key bytes are zeroized on drop and redacted from `Debug` output
//! - Keys are immutable once constructed; rotation replaces the whole key
//! - [`OtpKey::fingerprint`] identifies a key in logs without revealing it

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod error;
mod key;
mod policy;

pub use cipher::{transform, transform_in_place};
pub use error::CipherError;
pub use key::{OtpKey, generate_key};
pub use policy::{DEFAULT_KEY_SIZE, KeySizePolicy, MAX_KEY_SIZE};
