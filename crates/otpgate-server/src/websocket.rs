//! WebSocket adapters over tokio-tungstenite.
//!
//! One WebSocket message carries one payload, so no extra framing is needed.
//! Payloads are sent as binary messages; inbound text messages are accepted
//! and handed on as their UTF-8 bytes.

use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};

use crate::{
    connection::{PayloadSink, PayloadSource},
    error::ServerError,
};

/// Upgrade an accepted stream and split it into reader and writer halves.
pub(crate) async fn accept<S>(stream: S) -> Result<(WsReader<S>, WsWriter<S>), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| ServerError::Transport(format!("WebSocket accept failed: {e}")))?;

    let (sink, stream) = ws.split();
    Ok((WsReader { stream }, WsWriter { sink }))
}

/// Inbound half of a WebSocket.
pub(crate) struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> PayloadSource for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_payload(&mut self) -> Result<Option<Bytes>, ServerError> {
        while let Some(message) = self.stream.next().await {
            let message = message
                .map_err(|e| ServerError::Transport(format!("WebSocket read failed: {e}")))?;

            match message {
                Message::Binary(data) => return Ok(Some(Bytes::from(data))),
                Message::Text(text) => return Ok(Some(Bytes::from(text.into_bytes()))),
                Message::Close(_) => return Ok(None),
                // Pongs are queued by tungstenite and go out with the next write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {},
            }
        }
        Ok(None)
    }
}

/// Outbound half of a WebSocket.
pub(crate) struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> PayloadSink for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_payload(&mut self, payload: Bytes) -> Result<(), ServerError> {
        self.sink
            .send(Message::Binary(payload.to_vec()))
            .await
            .map_err(|e| ServerError::Transport(format!("WebSocket send failed: {e}")))
    }

    async fn finish(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::trace!("WebSocket close failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binary_and_text_messages_become_payloads() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            let (mut reader, mut writer) = accept(server_io).await.unwrap();
            let first = reader.next_payload().await.unwrap();
            let second = reader.next_payload().await.unwrap();
            writer.write_payload(Bytes::from_static(b"pong")).await.unwrap();
            let end = reader.next_payload().await.unwrap();
            (first, second, end)
        });

        let (mut client, _) =
            tokio_tungstenite::client_async("ws://localhost/", client_io).await.unwrap();
        client.send(Message::Binary(b"\x01\x02".to_vec())).await.unwrap();
        client.send(Message::Text("hi".to_string())).await.unwrap();

        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Binary(b"pong".to_vec()));
        client.close(None).await.unwrap();

        let (first, second, end) = server.await.unwrap();
        assert_eq!(first, Some(Bytes::from_static(b"\x01\x02")));
        assert_eq!(second, Some(Bytes::from_static(b"hi")));
        assert_eq!(end, None);
    }
}
