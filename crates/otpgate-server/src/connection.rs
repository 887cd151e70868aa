//! Queue-backed connection shared by every network listener.
//!
//! A [`StreamConnection`] is the [`Transport`] the registries see. Sends go
//! into a bounded queue drained by a writer task, so registry code never
//! awaits I/O. A peer that stops reading fills its queue; the next send fails
//! and closes the connection rather than blocking the caller. On close the
//! writer flushes whatever was queued before shutting the stream down.

use std::{future::Future, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use otpgate_core::{CloseCallback, Lifecycle, Transport, TransportError};
use otpgate_proto::ConnectionIdentity;
use tokio::sync::{
    Notify,
    mpsc::{self, error::TrySendError},
};

use crate::error::ServerError;

/// Payloads a connection may have queued for its writer.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 32;

/// Inbound half of a connection.
pub(crate) trait PayloadSource: Send + 'static {
    /// Next complete payload, or `None` once the peer has closed.
    fn next_payload(&mut self) -> impl Future<Output = Result<Option<Bytes>, ServerError>> + Send;
}

/// Outbound half of a connection.
pub(crate) trait PayloadSink: Send + 'static {
    /// Write one payload in full.
    fn write_payload(
        &mut self,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Best-effort graceful shutdown of the stream.
    fn finish(&mut self) -> impl Future<Output = ()> + Send;
}

/// A live socket or WebSocket connection.
#[derive(Debug)]
pub struct StreamConnection {
    id: ConnectionIdentity,
    remote: SocketAddr,
    secure: bool,
    lifecycle: Lifecycle,
    outbound: mpsc::Sender<Bytes>,
    closed: Notify,
}

impl StreamConnection {
    /// Connection plus the receiving end of its outbound queue.
    pub(crate) fn new(
        id: ConnectionIdentity,
        remote: SocketAddr,
        secure: bool,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let connection = Arc::new(Self {
            id,
            remote,
            secure,
            lifecycle: Lifecycle::new(),
            outbound,
            closed: Notify::new(),
        });
        (connection, queue)
    }

    /// Resolves once `close` has been called.
    ///
    /// Any number of tasks may wait at once.
    pub(crate) async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        // Registered before the check so a concurrent close cannot be missed
        notified.as_mut().enable();
        if self.lifecycle.is_open() {
            notified.await;
        }
    }
}

impl Transport for StreamConnection {
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
        match self.outbound.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    connection = %self.id,
                    remote = %self.remote,
                    capacity = OUTBOUND_QUEUE_CAPACITY,
                    "outbound queue full, closing connection"
                );
                self.close();
                Err(TransportError::Io("outbound queue full".to_string()))
            },
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed(self.id)),
        }
    }

    fn close(&self) {
        if self.lifecycle.mark_closed() {
            self.closed.notify_waiters();
            tracing::debug!(connection = %self.id, remote = %self.remote, "connection closed");
        }
    }

    fn on_close(&self, callback: CloseCallback) {
        self.lifecycle.on_close(callback);
    }
}

/// Drain `queue` into `sink` until the connection closes or a write fails.
pub(crate) async fn write_loop<W: PayloadSink>(
    connection: Arc<StreamConnection>,
    mut sink: W,
    mut queue: mpsc::Receiver<Bytes>,
) {
    loop {
        tokio::select! {
            biased;
            payload = queue.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = sink.write_payload(payload).await {
                    tracing::debug!(connection = %connection.id(), "write failed: {e}");
                    break;
                }
            },
            () = connection.closed() => {
                // Flush what was queued before the close
                while let Ok(payload) = queue.try_recv() {
                    if let Err(e) = sink.write_payload(payload).await {
                        tracing::debug!(connection = %connection.id(), "write failed: {e}");
                        break;
                    }
                }
                break;
            },
        }
    }

    sink.finish().await;
    connection.close();
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;

    use super::*;

    fn connection(
        id: u64,
        secure: bool,
    ) -> (Arc<StreamConnection>, mpsc::Receiver<Bytes>) {
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000);
        StreamConnection::new(ConnectionIdentity::new(id), remote, secure)
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<Bytes>>>,
        finished: Arc<AtomicUsize>,
    }

    impl PayloadSink for RecordingSink {
        async fn write_payload(&mut self, payload: Bytes) -> Result<(), ServerError> {
            self.written.lock().push(payload);
            Ok(())
        }

        async fn finish(&mut self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn close_flushes_queued_payloads_first() {
        let (connection, queue) = connection(1, false);
        let sink = RecordingSink::default();

        connection.send(Bytes::from_static(b"one")).unwrap();
        connection.send(Bytes::from_static(b"two")).unwrap();
        connection.close();

        write_loop(Arc::clone(&connection), sink.clone(), queue).await;

        assert_eq!(
            *sink.written.lock(),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
        assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (connection, _queue) = connection(2, true);
        connection.close();

        assert_eq!(
            connection.send(Bytes::from_static(b"late")),
            Err(TransportError::Closed(ConnectionIdentity::new(2)))
        );
        assert!(connection.is_secure());
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (connection, _queue) = connection(3, false);

        let waiter = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.closed().await })
        };
        connection.close();

        waiter.await.unwrap();
        connection.closed().await;
    }

    #[tokio::test]
    async fn full_queue_fails_send_and_closes() {
        let (connection, queue) = connection(5, false);
        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            connection.send(Bytes::from(i.to_string())).unwrap();
        }

        // Writer has not run: the next send must fail, not wait
        assert!(matches!(
            connection.send(Bytes::from_static(b"overflow")),
            Err(TransportError::Io(_))
        ));
        assert!(!connection.is_open());
        connection.closed().await;

        // Everything accepted before the overflow still goes out
        let sink = RecordingSink::default();
        write_loop(Arc::clone(&connection), sink.clone(), queue).await;
        assert_eq!(sink.written.lock().len(), OUTBOUND_QUEUE_CAPACITY);
        assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reader_and_writer_both_observe_close() {
        let (connection, queue) = connection(6, false);
        let sink = RecordingSink::default();
        let writer = tokio::spawn(write_loop(Arc::clone(&connection), sink.clone(), queue));
        let reader = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.closed().await })
        };

        connection.send(Bytes::from_static(b"last")).unwrap();
        connection.close();

        reader.await.unwrap();
        writer.await.unwrap();
        assert_eq!(*sink.written.lock(), vec![Bytes::from_static(b"last")]);
        assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_runs_callbacks_once() {
        let (connection, _queue) = connection(4, false);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        connection.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        connection.close();
        connection.close();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
