//! Otpgate server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! otpgate-server
//!
//! # Start with TLS certificate (production)
//! otpgate-server --cert cert.pem --key key.pem --pending-expiry-secs 15
//! ```

use std::time::Duration;

use clap::Parser;
use otpgate_core::{HandshakeConfig, config};
use otpgate_server::{Endpoint, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Otpgate key-rotation server
#[derive(Parser, Debug)]
#[command(name = "otpgate-server")]
#[command(about = "One-time-pad key rotation over paired clear and TLS channels")]
#[command(version)]
struct Args {
    /// Plain TCP (clear channel) listener address
    #[arg(long, default_value = "0.0.0.0:9100")]
    socket_bind: String,

    /// TLS (encrypted channel) listener address
    #[arg(long, default_value = "0.0.0.0:9101")]
    tls_bind: String,

    /// WebSocket (clear channel) listener address
    #[arg(long, default_value = "0.0.0.0:9102")]
    ws_bind: String,

    /// Secure WebSocket (encrypted channel) listener address
    #[arg(long, default_value = "0.0.0.0:9103")]
    wss_bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Key size used when a request does not name one (power of two)
    #[arg(long, default_value_t = HandshakeConfig::default().default_key_size)]
    default_key_size: usize,

    /// Largest key size a client may request (power of two)
    #[arg(long, default_value_t = HandshakeConfig::default().max_key_size)]
    max_key_size: usize,

    /// Seconds a generated key waits for its acknowledgement
    #[arg(long, default_value_t = config::DEFAULT_PENDING_EXPIRY.as_secs())]
    pending_expiry_secs: u64,

    /// Seconds an encrypted connection may stay silent before it is dropped
    #[arg(long, default_value_t = config::DEFAULT_ENCRYPTED_READ_TIMEOUT.as_secs())]
    encrypted_timeout_secs: u64,

    /// Assign random 64-bit connection identities instead of a counter
    #[arg(long)]
    random_identities: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerRuntimeConfig {
        ServerRuntimeConfig {
            socket_bind: self.socket_bind,
            tls_bind: self.tls_bind,
            ws_bind: self.ws_bind,
            wss_bind: self.wss_bind,
            cert_path: self.cert,
            key_path: self.key,
            handshake: HandshakeConfig {
                default_key_size: self.default_key_size,
                max_key_size: self.max_key_size,
                pending_expiry: Duration::from_secs(self.pending_expiry_secs),
                encrypted_read_timeout: Duration::from_secs(self.encrypted_timeout_secs),
            },
            random_identities: self.random_identities,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Otpgate server starting");

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("Issued keys are only as secret as the TLS channel that carries them!");
    }

    let server = Server::bind(args.into_config()).await?;

    for endpoint in Endpoint::ALL {
        tracing::info!("{} listening on {}", endpoint, server.local_addr(endpoint)?);
    }

    server.run().await?;

    tracing::info!("Otpgate server stopped");
    Ok(())
}
