//! End-to-end tests against a real server on loopback.
//!
//! The server loads a freshly generated certificate from PEM files; clients
//! trust exactly that certificate. Each test drives a full key rotation over
//! real TCP/TLS or WebSocket/secure WebSocket connections.

use std::{io::Write, net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use otpgate_core::HandshakeConfig;
use otpgate_harness::SimClient;
use otpgate_proto::{
    AckResponse, Codec, DeleteResponse, Frame, FrameHeader, JsonCodec, Message, ResponseCode,
};
use otpgate_server::{Endpoint, Server, ServerRuntimeConfig};
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::{client_async, tungstenite::Message as WsMessage};

const READ_LIMIT: Duration = Duration::from_secs(5);

struct Running {
    addrs: Vec<(Endpoint, SocketAddr)>,
    connector: TlsConnector,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    _files: (NamedTempFile, NamedTempFile),
}

impl Running {
    fn addr(&self, endpoint: Endpoint) -> SocketAddr {
        self.addrs.iter().find(|(e, _)| *e == endpoint).map(|(_, addr)| *addr).unwrap()
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop.send(()).unwrap();
        }
        self.task.await.unwrap();
    }
}

async fn start(handshake: HandshakeConfig) -> Running {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let mut cert = NamedTempFile::new().unwrap();
    cert.write_all(generated.cert.pem().as_bytes()).unwrap();
    let mut key = NamedTempFile::new().unwrap();
    key.write_all(generated.key_pair.serialize_pem().as_bytes()).unwrap();

    let config = ServerRuntimeConfig {
        socket_bind: "127.0.0.1:0".to_string(),
        tls_bind: "127.0.0.1:0".to_string(),
        ws_bind: "127.0.0.1:0".to_string(),
        wss_bind: "127.0.0.1:0".to_string(),
        cert_path: cert.path().to_str().map(str::to_string),
        key_path: key.path().to_str().map(str::to_string),
        handshake,
        random_identities: false,
    };

    let server = Server::bind(config).await.unwrap();
    let addrs = Endpoint::ALL
        .into_iter()
        .map(|endpoint| (endpoint, server.local_addr(endpoint).unwrap()))
        .collect();

    let (stop, stopped) = oneshot::channel();
    let task = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });

    let mut roots = RootCertStore::empty();
    roots.add(generated.cert.der().clone()).unwrap();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let client = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Running {
        addrs,
        connector: TlsConnector::from(Arc::new(client)),
        stop: Some(stop),
        task,
        _files: (cert, key),
    }
}

async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) {
    let frame = Frame::new(payload.to_vec()).unwrap();
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);
    stream.write_all(&buf).await.unwrap();
    stream.flush().await.unwrap();
}

async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Option<Bytes> {
    let read = async {
        let mut header = [0u8; FrameHeader::SIZE];
        stream.read_exact(&mut header).await.ok()?;
        let size = FrameHeader::from_bytes(&header).unwrap().payload_size() as usize;
        let mut payload = vec![0u8; size];
        stream.read_exact(&mut payload).await.unwrap();
        Some(Bytes::from(payload))
    };
    tokio::time::timeout(READ_LIMIT, read).await.unwrap()
}

async fn read_ws<S: AsyncRead + AsyncWrite + Unpin>(
    ws: &mut tokio_tungstenite::WebSocketStream<S>,
) -> Option<Vec<u8>> {
    let read = async {
        loop {
            match ws.next().await? {
                Ok(WsMessage::Binary(data)) => return Some(data),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => {},
            }
        }
    };
    tokio::time::timeout(READ_LIMIT, read).await.unwrap()
}

async fn tls_connect(
    running: &Running,
    endpoint: Endpoint,
) -> tokio_rustls::client::TlsStream<TcpStream> {
    let tcp = TcpStream::connect(running.addr(endpoint)).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    running.connector.connect(name, tcp).await.unwrap()
}

#[tokio::test]
async fn socket_rotation_and_relay() {
    let running = start(HandshakeConfig::default()).await;

    let mut alice_tcp = TcpStream::connect(running.addr(Endpoint::Socket)).await.unwrap();
    let mut alice =
        SimClient::from_welcome(JsonCodec, &read_frame(&mut alice_tcp).await.unwrap()).unwrap();

    let mut bob_tcp = TcpStream::connect(running.addr(Endpoint::Socket)).await.unwrap();
    let bob =
        SimClient::from_welcome(JsonCodec, &read_frame(&mut bob_tcp).await.unwrap()).unwrap();
    assert_ne!(alice.identity(), bob.identity());

    // Key request over TLS; the server answers and closes
    let mut tls = tls_connect(&running, Endpoint::Tls).await;
    write_frame(&mut tls, &alice.new_key_request(Some(256)).unwrap()).await;
    let response = read_frame(&mut tls).await.unwrap();
    assert_eq!(alice.accept_key_response(&response).unwrap().len(), 256);
    assert!(read_frame(&mut tls).await.is_none(), "encrypted channel closes after one request");

    // Acknowledge under the new key on the clear socket
    write_frame(&mut alice_tcp, &alice.ack().unwrap()).await;
    let reply = read_frame(&mut alice_tcp).await.unwrap();
    assert_eq!(alice.open(&reply).unwrap(), Message::AckResponse(AckResponse::ok()));

    // Bob speaks plaintext; Alice receives it sealed under her key
    write_frame(&mut bob_tcp, b"hello alice").await;
    let relayed = read_frame(&mut alice_tcp).await.unwrap();
    assert_ne!(relayed, Bytes::from_static(b"hello alice"));
    assert_eq!(alice.open_bytes(&relayed), b"hello alice".to_vec());

    // Alice speaks sealed; Bob receives plaintext
    write_frame(&mut alice_tcp, &alice.seal_bytes(b"hi bob")).await;
    assert_eq!(read_frame(&mut bob_tcp).await.unwrap(), Bytes::from_static(b"hi bob"));

    running.stop().await;
}

#[tokio::test]
async fn new_key_request_on_clear_socket_is_refused() {
    let running = start(HandshakeConfig::default()).await;

    let mut clear = TcpStream::connect(running.addr(Endpoint::Socket)).await.unwrap();
    let client =
        SimClient::from_welcome(JsonCodec, &read_frame(&mut clear).await.unwrap()).unwrap();

    write_frame(&mut clear, &client.new_key_request(Some(64)).unwrap()).await;
    match JsonCodec.decode(&read_frame(&mut clear).await.unwrap()).unwrap() {
        Message::ErrorResponse(error) => assert_eq!(error.code, ResponseCode::WrongChannel),
        other => panic!("expected ErrorResponse, got {other:?}"),
    }

    // The connection stays usable afterwards
    write_frame(&mut clear, b"still here").await;
    assert!(client.pending_key().is_none());

    running.stop().await;
}

#[tokio::test]
async fn silent_encrypted_connection_times_out() {
    let handshake = HandshakeConfig {
        encrypted_read_timeout: Duration::from_millis(200),
        ..HandshakeConfig::default()
    };
    let running = start(handshake).await;

    let mut tls = tls_connect(&running, Endpoint::Tls).await;
    assert!(read_frame(&mut tls).await.is_none());

    running.stop().await;
}

#[tokio::test]
async fn websocket_rotation() {
    let running = start(HandshakeConfig::default()).await;

    let tcp = TcpStream::connect(running.addr(Endpoint::WebSocket)).await.unwrap();
    let (mut clear, _) = client_async("ws://localhost/", tcp).await.unwrap();
    let mut client =
        SimClient::from_welcome(JsonCodec, &read_ws(&mut clear).await.unwrap()).unwrap();

    let tls = tls_connect(&running, Endpoint::SecureWebSocket).await;
    let (mut secure, _) = client_async("wss://localhost/", tls).await.unwrap();
    secure.send(WsMessage::Binary(client.new_key_request(None).unwrap())).await.unwrap();
    let response = read_ws(&mut secure).await.unwrap();
    assert_eq!(
        client.accept_key_response(&response).unwrap().len(),
        HandshakeConfig::default().default_key_size
    );

    clear.send(WsMessage::Binary(client.ack().unwrap())).await.unwrap();
    let reply = read_ws(&mut clear).await.unwrap();
    assert_eq!(client.open(&reply).unwrap(), Message::AckResponse(AckResponse::ok()));

    // Deleting over the clear channel returns to plaintext
    let delete = client.seal_bytes(&client.delete_request().unwrap());
    clear.send(WsMessage::Binary(delete)).await.unwrap();
    let reply = read_ws(&mut clear).await.unwrap();
    client.forget_key();
    assert_eq!(client.open(&reply).unwrap(), Message::DeleteResponse(DeleteResponse::ok()));

    running.stop().await;
}
