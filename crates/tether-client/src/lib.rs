//! tether-client: Interactive attach bridge between a local terminal and a
//! hijacked container stream.
//!
//! Provides:
//! - CLI argument parsing
//! - Local terminal endpoints and raw mode handling
//! - Detach key filtering
//! - Bidirectional stream copying
//! - Remote terminal resize with retry
//! - Session orchestration with cancellation

pub mod cli;
pub mod connection;
pub mod copier;
pub mod escape;
pub mod raw_mode;
pub mod resize;
pub mod session;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use cli::{Cli, CliLogFormat, Endpoint};
pub use connection::{ContainerEngine, EngineResizer, HalfClose, HijackedConnection};
pub use copier::{CopyResult, CopyTask, copy_inbound, copy_outbound};
pub use escape::{Detached, EscapeProxy, is_detach};
pub use raw_mode::RawModeGuard;
pub use resize::{ResizeMonitor, Resizer, WindowChanges};
pub use session::{
    LocalTerminal, Session, SessionRunner, SessionState, attach_and_run, run_session,
};
pub use terminal::{NotATerminal, StdinReader, TerminalDriver, TerminalEndpoint, TerminalMode};

#[cfg(unix)]
pub use terminal::TtyDriver;
