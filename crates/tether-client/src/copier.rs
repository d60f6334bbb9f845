//! The two directional byte copies of an attach session.
//!
//! Each direction runs as its own task and reports exactly one
//! `CopyResult`. Both restore the terminal on the way out, whatever the
//! reason, so the user gets a usable terminal back as soon as output stops.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use tether_core::{Direction, Error};

use crate::connection::HalfClose;
use crate::escape::is_detach;
use crate::raw_mode::RawModeGuard;

/// How one copy direction ended.
#[derive(Debug)]
pub enum CopyResult {
    /// The source reached EOF.
    Completed,
    /// A read or write failed.
    Error(Error),
    /// The user typed the detach sequence.
    EscapeDetected,
}

impl CopyResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A running copy direction.
#[derive(Debug)]
pub struct CopyTask {
    pub handle: JoinHandle<()>,
    pub result: oneshot::Receiver<CopyResult>,
}

impl CopyTask {
    fn spawn<F>(copy: F) -> Self
    where
        F: std::future::Future<Output = CopyResult> + Send + 'static,
    {
        // Single slot, so the task never waits on the orchestrator.
        let (tx, result) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let _ = tx.send(copy.await);
        });
        Self { handle, result }
    }

    /// Stop the task, dropping whatever halves it owns.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Errors that just mean the other end already went away.
fn is_closed_connection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Copy remote output to the local output until EOF or error.
pub fn copy_outbound<R, W>(
    mut remote: R,
    mut local: W,
    guard: RawModeGuard,
    buffer_size: usize,
) -> CopyTask
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    CopyTask::spawn(async move {
        let mut buf = vec![0u8; buffer_size.max(1)];
        let result = loop {
            let n = match remote.read(&mut buf).await {
                Ok(0) => {
                    debug!("Remote output EOF");
                    break CopyResult::Completed;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "Remote read failed");
                    break CopyResult::Error(Error::stream(Direction::Outbound, e));
                }
            };
            trace!(len = n, "remote -> local");
            if let Err(e) = write_chunk(&mut local, &buf[..n]).await {
                debug!(error = %e, "Local write failed");
                break CopyResult::Error(Error::stream(Direction::Outbound, e));
            }
        };
        guard.restore();
        result
    })
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}

/// Copy local input to the remote side until EOF, detach, or error.
///
/// EOF half-closes the remote write side. A detach leaves it open.
pub fn copy_inbound<R, W>(
    mut local: R,
    mut remote: W,
    guard: RawModeGuard,
    buffer_size: usize,
) -> CopyTask
where
    R: AsyncRead + Unpin + Send + 'static,
    W: HalfClose + 'static,
{
    CopyTask::spawn(async move {
        let mut buf = vec![0u8; buffer_size.max(1)];
        let result = loop {
            let n = match local.read(&mut buf).await {
                Ok(0) => {
                    debug!("Local input EOF, closing remote write side");
                    if let Err(e) = remote.close_write().await {
                        warn!(error = %e, "Failed to close remote write side");
                    }
                    break CopyResult::Completed;
                }
                Ok(n) => n,
                Err(e) if is_detach(&e) => {
                    debug!("Detach sequence read");
                    break CopyResult::EscapeDetected;
                }
                Err(e) => {
                    error!(error = %e, "Local read error");
                    break CopyResult::Error(Error::stream(Direction::Inbound, e));
                }
            };
            trace!(len = n, "local -> remote");
            if let Err(e) = write_chunk(&mut remote, &buf[..n]).await {
                if is_closed_connection(&e) {
                    debug!(error = %e, "Remote input already closed");
                } else {
                    error!(error = %e, "Failed to write input to remote");
                }
                break CopyResult::Error(Error::stream(Direction::Inbound, e));
            }
        };
        guard.restore();
        result
    })
}
