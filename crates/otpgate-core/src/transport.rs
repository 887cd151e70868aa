//! Transport contract shared by every connection kind.
//!
//! Registries and the handshake processor only ever see a connection through
//! [`Transport`]. Each real transport (TCP socket, TLS socket, WebSocket,
//! secure WebSocket, in-memory test transport) is a thin adapter that embeds a
//! [`Lifecycle`] for its open flag and close callbacks.

use std::{fmt, net::SocketAddr};

use bytes::Bytes;
use otpgate_proto::ConnectionIdentity;
use parking_lot::Mutex;
use thiserror::Error;

/// Callback run once when a connection closes.
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Errors from handing a payload to a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection was already closed.
    #[error("connection {0} is closed")]
    Closed(ConnectionIdentity),

    /// The transport failed to accept the payload.
    #[error("transport failure: {0}")]
    Io(String),
}

/// A live connection as seen by the registries.
///
/// # Invariants
///
/// - `id()` is stable and unique among live connections
/// - Once `is_open()` returns false it never returns true again
/// - Callbacks passed to `on_close` run exactly once, including when the
///   connection is already closed at registration time (immediately, on the
///   calling thread)
/// - `send` never blocks; payloads are queued in order
pub trait Transport: Send + Sync + 'static {
    /// Identity assigned to this connection at accept time.
    fn id(&self) -> ConnectionIdentity;

    /// Whether the connection is still open.
    fn is_open(&self) -> bool;

    /// Whether the transport is integrity-protected (TLS).
    fn is_secure(&self) -> bool;

    /// Remote peer address.
    fn remote_addr(&self) -> SocketAddr;

    /// Queue `payload` for delivery.
    fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Register a callback for connection close.
    fn on_close(&self, callback: CloseCallback);
}

/// Open flag plus run-once close callbacks.
///
/// Callbacks run outside the internal lock, so a callback may call back into
/// the same connection (e.g. `is_open`) without deadlocking.
#[derive(Default)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

#[derive(Default)]
struct LifecycleState {
    closed: bool,
    callbacks: Vec<CloseCallback>,
}

impl Lifecycle {
    /// New open lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `mark_closed` has not yet been called.
    pub fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    /// Register `callback`, running it now if already closed.
    pub fn on_close(&self, callback: CloseCallback) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            callback();
        } else {
            state.callbacks.push(callback);
        }
    }

    /// Mark closed and run every registered callback.
    ///
    /// Returns `true` on the first call only.
    pub fn mark_closed(&self) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback();
        }
        true
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Lifecycle")
            .field("closed", &state.closed)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, CloseCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, Box::new(move || {
            handle.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn callbacks_run_once_on_close() {
        let lifecycle = Lifecycle::new();
        let (count, callback) = counter();
        lifecycle.on_close(callback);

        assert!(lifecycle.is_open());
        assert!(lifecycle.mark_closed());
        assert!(!lifecycle.mark_closed());

        assert!(!lifecycle.is_open());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registration_runs_immediately() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_closed();

        let (count, callback) = counter();
        lifecycle.on_close(callback);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_query_lifecycle() {
        let lifecycle = Arc::new(Lifecycle::new());
        let observed = Arc::new(Mutex::new(None));

        let (inner, seen) = (Arc::clone(&lifecycle), Arc::clone(&observed));
        lifecycle.on_close(Box::new(move || {
            *seen.lock() = Some(inner.is_open());
        }));
        lifecycle.mark_closed();

        assert_eq!(*observed.lock(), Some(false));
    }
}
