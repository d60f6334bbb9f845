//! Detach key handling on the local input stream.
//!
//! `EscapeProxy` sits between the raw terminal and the inbound copier. Bytes
//! that could be the start of the detach sequence are held back; if the
//! sequence completes, reads fail with the `Detached` marker, otherwise the
//! held bytes are released in order.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use tether_core::DetachKeys;

/// Marker carried by the I/O error that signals a manual detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detached;

impl fmt::Display for Detached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("read detach key sequence")
    }
}

impl std::error::Error for Detached {}

/// Build the detach I/O error.
pub fn detach_error() -> io::Error {
    io::Error::other(Detached)
}

/// Check whether an I/O error is the manual detach signal.
pub fn is_detach(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<Detached>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    /// Passing input through.
    Normal,
    /// Detach sequence seen; every further read fails.
    Detached,
}

/// Reader adapter that turns the detach key sequence into an error.
#[derive(Debug)]
pub struct EscapeProxy<R> {
    inner: R,
    keys: Vec<u8>,
    /// Length of the detach prefix currently held back.
    matched: usize,
    /// Bytes ready for the caller.
    ready: Vec<u8>,
    ready_pos: usize,
    scratch: Vec<u8>,
    state: EscapeState,
}

impl<R> EscapeProxy<R> {
    pub fn new(inner: R, keys: &DetachKeys) -> Self {
        Self {
            inner,
            keys: keys.as_bytes().to_vec(),
            matched: 0,
            ready: Vec::new(),
            ready_pos: 0,
            scratch: vec![0u8; 1024],
            state: EscapeState::Normal,
        }
    }

    /// Whether the detach sequence has been read.
    pub fn is_detached(&self) -> bool {
        self.state == EscapeState::Detached
    }

    /// Run freshly read bytes through the matcher.
    fn feed(&mut self, input: &[u8]) {
        for &byte in input {
            if byte == self.keys[self.matched] {
                self.matched += 1;
                if self.matched == self.keys.len() {
                    // Anything after the sequence in this chunk is dropped.
                    self.matched = 0;
                    self.state = EscapeState::Detached;
                    return;
                }
                continue;
            }

            if self.matched > 0 {
                // Broken prefix: release it, then retry this byte fresh.
                // A held prefix implies the sequence is at least two keys.
                self.ready.extend_from_slice(&self.keys[..self.matched]);
                self.matched = 0;
                if byte == self.keys[0] {
                    self.matched = 1;
                    continue;
                }
            }
            self.ready.push(byte);
        }
    }

    fn take_ready(&mut self, buf: &mut ReadBuf<'_>) -> bool {
        if self.ready_pos >= self.ready.len() {
            return false;
        }
        let available = &self.ready[self.ready_pos..];
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        self.ready_pos += n;
        if self.ready_pos >= self.ready.len() {
            self.ready.clear();
            self.ready_pos = 0;
        }
        true
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for EscapeProxy<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.keys.is_empty() {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        loop {
            if this.take_ready(buf) {
                return Poll::Ready(Ok(()));
            }
            if this.state == EscapeState::Detached {
                return Poll::Ready(Err(detach_error()));
            }

            let filled = {
                let mut read_buf = ReadBuf::new(&mut this.scratch);
                match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Ready(Ok(())) => read_buf.filled().len(),
                }
            };

            if filled == 0 {
                // EOF: a held prefix was real input after all.
                if this.matched == 0 {
                    return Poll::Ready(Ok(()));
                }
                let held = std::mem::take(&mut this.matched);
                this.ready.extend_from_slice(&this.keys[..held]);
                continue;
            }

            let scratch = std::mem::take(&mut this.scratch);
            this.feed(&scratch[..filled]);
            this.scratch = scratch;
        }
    }
}
