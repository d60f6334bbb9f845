//! Mock hijacked connection for testing without a container engine.
//!
//! `mock_connection()` returns the session side, which implements
//! `HijackedConnection`, and a `RemoteEnd` that plays the remote process.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf, ReadHalf,
    WriteHalf,
};

use tether_client::{HalfClose, HijackedConnection};

const MOCK_BUFFER_SIZE: usize = 64 * 1024;

/// Create a connected mock session side and remote end.
pub fn mock_connection() -> (MockConnection, RemoteEnd) {
    let (local, remote) = tokio::io::duplex(MOCK_BUFFER_SIZE);
    let half_closes = Arc::new(AtomicUsize::new(0));
    (
        MockConnection {
            stream: local,
            half_closes: half_closes.clone(),
        },
        RemoteEnd {
            stream: remote,
            half_closes,
        },
    )
}

/// Session side of a mock connection.
#[derive(Debug)]
pub struct MockConnection {
    stream: DuplexStream,
    half_closes: Arc<AtomicUsize>,
}

impl HijackedConnection for MockConnection {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = MockWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = tokio::io::split(self.stream);
        (
            reader,
            MockWriter {
                inner: writer,
                half_closes: self.half_closes,
            },
        )
    }
}

/// Write half that counts half-closes.
#[derive(Debug)]
pub struct MockWriter {
    inner: WriteHalf<DuplexStream>,
    half_closes: Arc<AtomicUsize>,
}

impl AsyncWrite for MockWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl HalfClose for MockWriter {
    async fn close_write(&mut self) -> io::Result<()> {
        self.half_closes.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown().await
    }
}

/// The remote process's end of a mock connection.
#[derive(Debug)]
pub struct RemoteEnd {
    stream: DuplexStream,
    half_closes: Arc<AtomicUsize>,
}

impl RemoteEnd {
    /// Send output to the session.
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await
    }

    /// Read session input until the session half-closes or goes away.
    pub async fn read_input(&mut self) -> io::Result<Vec<u8>> {
        let mut input = Vec::new();
        self.stream.read_to_end(&mut input).await?;
        Ok(input)
    }

    /// Read exactly `len` bytes of session input.
    pub async fn read_exact_input(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut input = vec![0u8; len];
        self.stream.read_exact(&mut input).await?;
        Ok(input)
    }

    /// How many times the session half-closed its write side.
    pub fn half_closes(&self) -> usize {
        self.half_closes.load(Ordering::SeqCst)
    }

    /// Close the connection as a remote process exit would.
    pub fn hang_up(self) {
        drop(self.stream);
    }
}

impl AsyncRead for RemoteEnd {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for RemoteEnd {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn half_close_is_counted_and_seen_as_eof() {
        let (connection, mut remote) = mock_connection();
        let (mut reader, mut writer) = HijackedConnection::split(connection);

        writer.write_all(b"input").await.unwrap();
        writer.close_write().await.unwrap();
        assert_eq!(remote.read_input().await.unwrap(), b"input");
        assert_eq!(remote.half_closes(), 1);

        remote.send(b"output").await.unwrap();
        remote.hang_up();
        let mut output = Vec::new();
        reader.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, b"output");
    }
}
