//! Otpgate production server.
//!
//! Network glue around [`otpgate_core`]: four TCP listeners feeding one
//! [`ServerContext`], with Tokio for the runtime, rustls for TLS and
//! tokio-tungstenite for WebSockets.
//!
//! # Listeners
//!
//! | Endpoint          | Role      | Framing                |
//! |-------------------|-----------|------------------------|
//! | TCP               | clear     | 12-byte header + body  |
//! | TLS               | encrypted | 12-byte header + body  |
//! | WebSocket         | clear     | one message per body   |
//! | secure WebSocket  | encrypted | one message per body   |
//!
//! Clear connections are long-lived and carry application traffic under the
//! active one-time-pad key. Encrypted connections carry exactly one key
//! request and are then closed.
//!
//! # Components
//!
//! - [`Server`]: binds the listeners and runs the accept loops
//! - [`ServerContext`]: registries and handshake processors shared by all
//!   connections
//! - [`StreamConnection`]: the [`Transport`](otpgate_core::Transport) every
//!   network connection is seen through
//! - [`SystemEnv`]: production environment (Tokio time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod context;
mod error;
mod handler;
mod socket;
mod system_env;
mod tls;
mod websocket;

use std::{fmt, future::Future, net::SocketAddr, sync::Arc, time::Duration};

pub use connection::StreamConnection;
pub use context::{ChannelKey, ServerContext, TransportKind, TransportLayer};
pub use error::ServerError;
pub use handler::SharedContext;
use handler::{Accepted, serve};
use otpgate_core::{ChannelRole, HandshakeConfig, RandomIdentities};
use socket::{FrameReader, FrameWriter};
pub use system_env::SystemEnv;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time::timeout,
};
use tokio_rustls::{TlsAcceptor, server::TlsStream};

/// One of the four listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Plain TCP, clear channel.
    Socket,
    /// TLS over TCP, encrypted channel.
    Tls,
    /// WebSocket, clear channel.
    WebSocket,
    /// WebSocket over TLS, encrypted channel.
    SecureWebSocket,
}

impl Endpoint {
    /// Every endpoint, in bind order.
    pub const ALL: [Self; 4] = [Self::Socket, Self::Tls, Self::WebSocket, Self::SecureWebSocket];

    /// Transport layer the endpoint feeds.
    pub const fn kind(self) -> TransportKind {
        match self {
            Self::Socket | Self::Tls => TransportKind::Socket,
            Self::WebSocket | Self::SecureWebSocket => TransportKind::WebSocket,
        }
    }

    /// Channel role of connections accepted here.
    pub const fn role(self) -> ChannelRole {
        match self {
            Self::Socket | Self::WebSocket => ChannelRole::Clear,
            Self::Tls | Self::SecureWebSocket => ChannelRole::Encrypted,
        }
    }

    /// Short name used in logs.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Socket => "tcp",
            Self::Tls => "tls",
            Self::WebSocket => "ws",
            Self::SecureWebSocket => "wss",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Plain TCP listener address
    pub socket_bind: String,
    /// TLS listener address
    pub tls_bind: String,
    /// WebSocket listener address
    pub ws_bind: String,
    /// Secure WebSocket listener address
    pub wss_bind: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Key sizes, expiry and timeouts
    pub handshake: HandshakeConfig,
    /// Draw connection identities from the RNG instead of a counter
    pub random_identities: bool,
}

impl ServerRuntimeConfig {
    /// Bind address configured for `endpoint`.
    pub fn bind_address(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Socket => &self.socket_bind,
            Endpoint::Tls => &self.tls_bind,
            Endpoint::WebSocket => &self.ws_bind,
            Endpoint::SecureWebSocket => &self.wss_bind,
        }
    }
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            socket_bind: "0.0.0.0:9100".to_string(),
            tls_bind: "0.0.0.0:9101".to_string(),
            ws_bind: "0.0.0.0:9102".to_string(),
            wss_bind: "0.0.0.0:9103".to_string(),
            cert_path: None,
            key_path: None,
            handshake: HandshakeConfig::default(),
            random_identities: false,
        }
    }
}

struct Listener {
    endpoint: Endpoint,
    socket: TcpListener,
}

/// Production otpgate server.
pub struct Server {
    context: SharedContext<SystemEnv>,
    acceptor: TlsAcceptor,
    listeners: Vec<Listener>,
}

impl Server {
    /// Validate the configuration and bind every listener.
    ///
    /// Nothing is bound if the handshake configuration or TLS setup is
    /// invalid.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let mut context = ServerContext::new(env, config.handshake.clone())?;
        if config.random_identities {
            context = context.with_identities(RandomIdentities::new(env));
        }

        let acceptor = tls::acceptor(config.cert_path.as_deref(), config.key_path.as_deref())?;

        let mut listeners = Vec::with_capacity(Endpoint::ALL.len());
        for endpoint in Endpoint::ALL {
            let address = config.bind_address(endpoint);
            let addr: SocketAddr = address.parse().map_err(|e| {
                ServerError::Config(format!("invalid {endpoint} bind address '{address}': {e}"))
            })?;

            let socket = TcpListener::bind(addr).await.map_err(|e| {
                ServerError::Transport(format!("failed to bind {endpoint} listener on {addr}: {e}"))
            })?;

            tracing::info!("{} listener bound to {}", endpoint, socket.local_addr()?);
            listeners.push(Listener { endpoint, socket });
        }

        Ok(Self { context: Arc::new(context), acceptor, listeners })
    }

    /// Local address of `endpoint`'s listener.
    pub fn local_addr(&self, endpoint: Endpoint) -> Result<SocketAddr, ServerError> {
        let listener = self
            .listeners
            .iter()
            .find(|listener| listener.endpoint == endpoint)
            .ok_or_else(|| ServerError::Internal(format!("no {endpoint} listener")))?;

        listener
            .socket
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Shared state, for embedding the server in a larger application.
    pub fn context(&self) -> &SharedContext<SystemEnv> {
        &self.context
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the accept loops until `shutdown` resolves, then clear all state.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        for listener in self.listeners {
            tasks.spawn(accept_loop(listener, Arc::clone(&self.context), self.acceptor.clone()));
        }

        let result = tokio::select! {
            () = shutdown => {
                tracing::info!("shutdown requested");
                Ok(())
            },
            exited = tasks.join_next() => {
                let reason = match exited {
                    Some(Err(e)) => format!("listener task failed: {e}"),
                    _ => "listener task exited".to_string(),
                };
                Err(ServerError::Internal(reason))
            },
        };

        tasks.abort_all();
        self.context.shutdown();
        result
    }
}

async fn accept_loop(
    listener: Listener,
    context: SharedContext<SystemEnv>,
    acceptor: TlsAcceptor,
) {
    let endpoint = listener.endpoint;

    loop {
        match listener.socket.accept().await {
            Ok((stream, remote)) => {
                let context = Arc::clone(&context);
                let acceptor = acceptor.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(endpoint, stream, remote, context, acceptor).await
                    {
                        tracing::debug!(%endpoint, %remote, "connection setup failed: {e}");
                    }
                });
            },
            Err(e) => {
                tracing::error!(%endpoint, "accept error: {e}");
            },
        }
    }
}

/// Complete TLS and WebSocket setup for `endpoint`, then serve the stream.
async fn handle_stream(
    endpoint: Endpoint,
    stream: TcpStream,
    remote: SocketAddr,
    context: SharedContext<SystemEnv>,
    acceptor: TlsAcceptor,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;

    let accepted = Accepted { kind: endpoint.kind(), role: endpoint.role(), remote };
    let limit = context.config().encrypted_read_timeout;

    match endpoint {
        Endpoint::Socket => {
            let (read, write) = stream.into_split();
            serve(context, accepted, FrameReader::new(read), FrameWriter::new(write)).await;
        },
        Endpoint::Tls => {
            let tls = tls_handshake(&acceptor, stream, limit).await?;
            let (read, write) = tokio::io::split(tls);
            serve(context, accepted, FrameReader::new(read), FrameWriter::new(write)).await;
        },
        Endpoint::WebSocket => {
            let (reader, writer) = upgrade(stream, limit).await?;
            serve(context, accepted, reader, writer).await;
        },
        Endpoint::SecureWebSocket => {
            let tls = tls_handshake(&acceptor, stream, limit).await?;
            let (reader, writer) = upgrade(tls, limit).await?;
            serve(context, accepted, reader, writer).await;
        },
    }
    Ok(())
}

async fn tls_handshake(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    limit: Duration,
) -> Result<TlsStream<TcpStream>, ServerError> {
    timeout(limit, acceptor.accept(stream))
        .await
        .map_err(|_| ServerError::Transport(format!("TLS handshake timed out after {limit:?}")))?
        .map_err(|e| ServerError::Transport(format!("TLS handshake failed: {e}")))
}

async fn upgrade<S>(
    stream: S,
    limit: Duration,
) -> Result<(websocket::WsReader<S>, websocket::WsWriter<S>), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    timeout(limit, websocket::accept(stream)).await.map_err(|_| {
        ServerError::Transport(format!("WebSocket upgrade timed out after {limit:?}"))
    })?
}
