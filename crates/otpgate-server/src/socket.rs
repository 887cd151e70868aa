//! Length-prefixed framing for TCP and TLS sockets.
//!
//! Every payload travels as a [`Frame`]: the 12-byte [`FrameHeader`] in the
//! clear, then the payload. The OTP cipher only ever touches the payload.

use bytes::{Bytes, BytesMut};
use otpgate_proto::{Frame, FrameHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    connection::{PayloadSink, PayloadSource},
    error::ServerError,
};

/// Reads frames from the read half of a socket.
pub(crate) struct FrameReader<R> {
    inner: R,
}

impl<R> FrameReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R> PayloadSource for FrameReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_payload(&mut self) -> Result<Option<Bytes>, ServerError> {
        let mut header = [0u8; FrameHeader::SIZE];
        match self.inner.read_exact(&mut header).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let payload_size = FrameHeader::from_bytes(&header)?.payload_size() as usize;
        let mut payload = BytesMut::zeroed(payload_size);
        self.inner.read_exact(&mut payload).await?;

        Ok(Some(payload.freeze()))
    }
}

/// Writes frames to the write half of a socket.
pub(crate) struct FrameWriter<W> {
    inner: W,
}

impl<W> FrameWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> PayloadSink for FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_payload(&mut self, payload: Bytes) -> Result<(), ServerError> {
        let frame = Frame::new(payload)?;
        let mut buf = BytesMut::with_capacity(frame.encoded_len());
        frame.encode(&mut buf);

        self.inner.write_all(&buf).await?;
        // TLS buffers records until flushed
        self.inner.flush().await?;
        Ok(())
    }

    async fn finish(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::trace!("socket shutdown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_payload(Bytes::from_static(b"hello")).await.unwrap();
        writer.write_payload(Bytes::new()).await.unwrap();
        writer.finish().await;

        assert_eq!(reader.next_payload().await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(reader.next_payload().await.unwrap(), Some(Bytes::new()));
        assert_eq!(reader.next_payload().await.unwrap(), None);
    }

    #[tokio::test]
    async fn bad_magic_is_protocol_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        assert!(matches!(reader.next_payload().await, Err(ServerError::Protocol(_))));
    }

    #[tokio::test]
    async fn truncated_payload_is_transport_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        let mut header = FrameHeader::new().to_bytes();
        header[8..12].copy_from_slice(&10u32.to_be_bytes());
        client.write_all(&header).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(matches!(reader.next_payload().await, Err(ServerError::Transport(_))));
    }

    fn drain(bytes: Vec<u8>) -> Vec<Result<Option<Bytes>, ServerError>> {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async move {
            let (mut client, server) = tokio::io::duplex(bytes.len().max(1));
            client.write_all(&bytes).await.unwrap();
            drop(client);

            let mut reader = FrameReader::new(server);
            let mut results = Vec::new();
            loop {
                let result = reader.next_payload().await;
                let done = !matches!(result, Ok(Some(_)));
                results.push(result);
                if done {
                    return results;
                }
            }
        })
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_input_terminates(bytes in proptest::collection::vec(0u8..=255, 0..256)) {
            let results = drain(bytes);
            let last = results.last();
            proptest::prop_assert!(last.is_some_and(|last| !matches!(last, Ok(Some(_)))));
        }
    }
}
