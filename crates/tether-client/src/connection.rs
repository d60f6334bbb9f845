//! Hijacked connection capability and the container engine seam.
//!
//! The engine hands back a duplex byte stream after upgrading an attach or
//! exec-start request. The session needs exactly three things from it: read,
//! write, and a half-close of the write side so the remote process sees
//! end-of-input while its output keeps flowing.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use tether_core::{Dimensions, Result};

use crate::resize::Resizer;

/// Write half that can signal end-of-input without closing the read side.
#[async_trait]
pub trait HalfClose: AsyncWrite + Unpin + Send {
    /// Shut down the write direction only.
    async fn close_write(&mut self) -> io::Result<()>;
}

/// A hijacked duplex connection to a remote process.
pub trait HijackedConnection: Send + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: HalfClose + 'static;

    /// Split into independently owned read and write halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

#[async_trait]
impl HalfClose for tokio::net::tcp::OwnedWriteHalf {
    async fn close_write(&mut self) -> io::Result<()> {
        // shutdown(Write) on the socket; the read half stays open.
        self.shutdown().await
    }
}

impl HijackedConnection for tokio::net::TcpStream {
    type Reader = tokio::net::tcp::OwnedReadHalf;
    type Writer = tokio::net::tcp::OwnedWriteHalf;

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.into_split()
    }
}

#[cfg(unix)]
#[async_trait]
impl HalfClose for tokio::net::unix::OwnedWriteHalf {
    async fn close_write(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

#[cfg(unix)]
impl HijackedConnection for tokio::net::UnixStream {
    type Reader = tokio::net::unix::OwnedReadHalf;
    type Writer = tokio::net::unix::OwnedWriteHalf;

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.into_split()
    }
}

#[async_trait]
impl HalfClose for tokio::io::WriteHalf<tokio::io::DuplexStream> {
    async fn close_write(&mut self) -> io::Result<()> {
        // The peer's reads return EOF; our read half keeps working.
        self.shutdown().await
    }
}

impl HijackedConnection for tokio::io::DuplexStream {
    type Reader = tokio::io::ReadHalf<tokio::io::DuplexStream>;
    type Writer = tokio::io::WriteHalf<tokio::io::DuplexStream>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        tokio::io::split(self)
    }
}

/// The container engine client, consumed through attach and resize only.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    type Connection: HijackedConnection;

    /// Attach to a container or exec session, returning the hijacked stream.
    async fn attach(&self, id: &str) -> Result<Self::Connection>;

    /// Resize the remote pseudo-terminal of a container or exec session.
    async fn resize(&self, id: &str, size: Dimensions) -> Result<()>;
}

/// `Resizer` bound to one engine session id.
pub struct EngineResizer<E> {
    engine: Arc<E>,
    id: String,
}

impl<E: ContainerEngine> EngineResizer<E> {
    pub fn new(engine: Arc<E>, id: impl Into<String>) -> Self {
        Self {
            engine,
            id: id.into(),
        }
    }
}

#[async_trait]
impl<E: ContainerEngine + 'static> Resizer for EngineResizer<E> {
    async fn resize(&self, size: Dimensions) -> Result<()> {
        debug!(id = %self.id, %size, "Resizing remote terminal");
        self.engine.resize(&self.id, size).await
    }
}
