//! tether-test-utils: Test infrastructure for tether.
//!
//! Provides:
//! - FakeTerminal: Scriptable terminal driver that counts mode changes
//! - MockConnection: In-memory hijacked connection with a remote-side handle
//! - ScriptedResizer: Resizer that fails a set number of times

mod fake_terminal;
mod mock_connection;
mod scripted_resizer;

pub use fake_terminal::FakeTerminal;
pub use mock_connection::{MockConnection, MockWriter, RemoteEnd, mock_connection};
pub use scripted_resizer::ScriptedResizer;
