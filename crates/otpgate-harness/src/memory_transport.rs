//! In-memory transport that records everything sent to it.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use bytes::Bytes;
use otpgate_core::{CloseCallback, Lifecycle, Transport, TransportError};
use otpgate_proto::ConnectionIdentity;
use parking_lot::Mutex;

/// Address used by [`MemoryTransport::clear`] and [`MemoryTransport::secure`].
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Transport that keeps sent payloads in memory.
///
/// Closing (from either side) runs the registered close callbacks exactly as
/// a real adapter does when its socket goes away.
#[derive(Debug)]
pub struct MemoryTransport {
    id: ConnectionIdentity,
    remote: SocketAddr,
    secure: bool,
    lifecycle: Lifecycle,
    sent: Mutex<Vec<Bytes>>,
}

impl MemoryTransport {
    /// Transport with explicit parameters.
    pub fn new(id: u64, remote: SocketAddr, secure: bool) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionIdentity::new(id),
            remote,
            secure,
            lifecycle: Lifecycle::new(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Plain connection from the loopback host.
    pub fn clear(id: u64) -> Arc<Self> {
        Self::new(id, SocketAddr::new(LOOPBACK, 40_000), false)
    }

    /// TLS connection from the loopback host.
    pub fn secure(id: u64) -> Arc<Self> {
        Self::new(id, SocketAddr::new(LOOPBACK, 40_001), true)
    }

    /// TLS connection from another host.
    pub fn secure_from(id: u64, host: IpAddr) -> Arc<Self> {
        Self::new(id, SocketAddr::new(host, 40_002), true)
    }

    /// Every payload sent so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Drain and return sent payloads.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Most recently sent payload.
    pub fn last_sent(&self) -> Option<Bytes> {
        self.sent.lock().last().cloned()
    }

    /// Simulate the peer hanging up.
    pub fn peer_close(&self) {
        self.lifecycle.mark_closed();
    }
}

impl Transport for MemoryTransport {
    fn id(&self) -> ConnectionIdentity {
        self.id
    }

    fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.lifecycle.is_open() {
            return Err(TransportError::Closed(self.id));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.lifecycle.mark_closed();
    }

    fn on_close(&self, callback: CloseCallback) {
        self.lifecycle.on_close(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_close_fails() {
        let transport = MemoryTransport::clear(1);
        transport.send(Bytes::from_static(b"one")).unwrap();
        transport.close();

        assert_eq!(
            transport.send(Bytes::from_static(b"two")),
            Err(TransportError::Closed(ConnectionIdentity::new(1)))
        );
        assert_eq!(transport.sent(), vec![Bytes::from_static(b"one")]);
    }
}
