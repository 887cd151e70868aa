//! Per-connection tasks.
//!
//! Each accepted connection gets a reader task (this module) and a writer
//! task ([`write_loop`]). The reader hands messages to the [`ServerContext`]
//! one at a time, so a connection's messages are processed in arrival order
//! and a key activation commits before the next message is read.

use std::{net::SocketAddr, sync::Arc};

use otpgate_core::{ChannelRole, Environment, Transport};

use crate::{
    connection::{PayloadSink, PayloadSource, StreamConnection, write_loop},
    context::{ServerContext, TransportKind},
};

/// Context as shared by the network tasks.
pub type SharedContext<E> = Arc<ServerContext<StreamConnection, E>>;

/// Where an accepted connection came from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Accepted {
    pub kind: TransportKind,
    pub role: ChannelRole,
    pub remote: SocketAddr,
}

/// Wire up an accepted, fully handshaken stream and serve it to completion.
pub(crate) async fn serve<E, R, W>(
    context: SharedContext<E>,
    accepted: Accepted,
    reader: R,
    writer: W,
) where
    E: Environment,
    R: PayloadSource,
    W: PayloadSink,
{
    let secure = accepted.role == ChannelRole::Encrypted;
    let (connection, queue) =
        StreamConnection::new(context.next_identity(), accepted.remote, secure);
    tokio::spawn(write_loop(Arc::clone(&connection), writer, queue));

    match accepted.role {
        ChannelRole::Clear => serve_clear(&context, accepted.kind, &connection, reader).await,
        ChannelRole::Encrypted => {
            serve_encrypted(&context, accepted.kind, &connection, reader).await;
        },
    }
    connection.close();
}

async fn serve_clear<E: Environment, R: PayloadSource>(
    context: &SharedContext<E>,
    kind: TransportKind,
    connection: &Arc<StreamConnection>,
    mut reader: R,
) {
    context.accept_clear(kind, connection);
    let identity = connection.id();

    loop {
        tokio::select! {
            () = connection.closed() => break,
            payload = reader.next_payload() => match payload {
                Ok(Some(bytes)) => {
                    context.on_clear_message(kind, connection, &bytes);
                },
                Ok(None) => {
                    tracing::debug!(transport = kind.label(), %identity, "peer closed");
                    break;
                },
                Err(e) => {
                    tracing::warn!(transport = kind.label(), %identity, "read failed: {e}");
                    break;
                },
            },
        }
    }
}

async fn serve_encrypted<E: Environment, R: PayloadSource>(
    context: &SharedContext<E>,
    kind: TransportKind,
    connection: &Arc<StreamConnection>,
    mut reader: R,
) {
    let timeout = context.config().encrypted_read_timeout;
    let id = connection.id();

    match tokio::time::timeout(timeout, reader.next_payload()).await {
        Ok(Ok(Some(bytes))) => {
            context.on_encrypted_message(kind, connection, &bytes);
        },
        Ok(Ok(None)) => {
            tracing::debug!(transport = kind.label(), connection = %id, "closed before request");
        },
        Ok(Err(e)) => {
            tracing::warn!(transport = kind.label(), connection = %id, "request read failed: {e}");
        },
        Err(_) => {
            tracing::warn!(
                transport = kind.label(),
                connection = %id,
                ?timeout,
                "no key request before timeout"
            );
        },
    }
}
