//! TLS configuration for the encrypted listeners.
//!
//! Both the TLS socket and the secure WebSocket listener terminate TLS with
//! the same `rustls` configuration. Supports production certificates (via PEM
//! files) and self-signed certificates for local testing.
//!
//! # Security
//!
//! The encrypted channel is what keeps key material secret in transit. A
//! self-signed certificate lets any on-path attacker impersonate the server
//! and read every issued key, so it is only suitable for local testing.

use std::sync::Arc;

use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
};
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;

/// Build the acceptor shared by the encrypted listeners.
///
/// If `cert_path` and `key_path` are both provided they are loaded from PEM.
/// Otherwise a self-signed certificate for `localhost` is generated.
pub fn acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<TlsAcceptor, ServerError> {
    let config = match (cert_path, key_path) {
        (Some(cert), Some(key)) => load_tls_config(cert, key)?,
        _ => generate_self_signed_config()?,
    };
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Load TLS configuration from certificate and key files.
fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    use std::fs;

    let cert_pem = fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    if certs.is_empty() {
        return Err(ServerError::Config(format!("no certificates found in '{cert_path}'")));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    tracing::info!(cert = cert_path, "loaded TLS certificate");
    build(certs, key)
}

/// Generate a self-signed certificate for testing.
fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let config = build(cert_chain, key.into())?;

    tracing::warn!("Using self-signed certificate - not for production use!");

    Ok(config)
}

fn build(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Config(format!("unsupported TLS versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn self_signed_acceptor_builds() {
        assert!(acceptor(None, None).is_ok());
    }

    #[test]
    fn half_configured_pair_falls_back_to_self_signed() {
        assert!(acceptor(Some("/nonexistent/cert.pem"), None).is_ok());
    }

    #[test]
    fn loads_pem_files() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let mut cert = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(generated.cert.pem().as_bytes()).unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        key.write_all(generated.key_pair.serialize_pem().as_bytes()).unwrap();

        let result = acceptor(cert.path().to_str(), key.path().to_str());
        assert!(result.is_ok(), "PEM pair should load");
    }

    #[test]
    fn missing_cert_file_is_config_error() {
        let result = acceptor(Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem"));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn file_without_key_is_rejected() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let mut cert = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(generated.cert.pem().as_bytes()).unwrap();

        let path = cert.path().to_str();
        let result = acceptor(path, path);
        assert!(matches!(result, Err(ServerError::Config(msg)) if msg.contains("no private key")));
    }
}
