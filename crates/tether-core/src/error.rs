//! Error types for tether-core.

use std::fmt;

use thiserror::Error;

/// Direction of a byte copy between the local terminal and the remote stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local input copied to the remote connection.
    Inbound,
    /// Remote output copied to the local terminal.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("local input -> remote"),
            Direction::Outbound => f.write_str("remote -> local output"),
        }
    }
}

/// Main error type for tether operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session was started without an id.
    #[error("session id must not be empty")]
    EmptySessionId,

    /// Switching the terminal into or out of raw mode failed.
    #[error("terminal mode error ({operation}): {source}")]
    TerminalMode {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The local terminal reported a zero size.
    #[error("invalid terminal size {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },

    /// Read or write failure on one copy direction.
    #[error("stream error ({direction}): {source}")]
    Stream {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    /// The caller cancelled the session.
    #[error("session cancelled")]
    Cancelled,

    /// A session runner was started a second time.
    #[error("session already closed")]
    SessionClosed,

    /// The container engine rejected an attach or resize request.
    #[error("engine error: {message}")]
    Engine { message: String },

    /// Detach key specification could not be parsed.
    #[error("invalid detach keys: {message}")]
    InvalidDetachKeys { message: String },
}

impl Error {
    /// Returns true if this error ends a session when it reaches the
    /// orchestrator.
    ///
    /// Resize failures and inbound copy failures degrade the session but
    /// never end it; they are logged where they happen.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::InvalidSize { .. } => false,
            Error::Stream { direction, .. } => *direction == Direction::Outbound,
            _ => true,
        }
    }

    /// Returns true if this error is the caller-driven cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Wrap an I/O failure on the given copy direction.
    pub fn stream(direction: Direction, source: std::io::Error) -> Self {
        Error::Stream { direction, source }
    }
}

/// Convenience result type for tether operations.
pub type Result<T> = std::result::Result<T, Error>;
