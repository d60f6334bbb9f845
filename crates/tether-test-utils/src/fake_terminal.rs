//! Fake terminal for testing without a real tty.
//!
//! Implements `TerminalDriver` in memory, counting every call so tests can
//! check how often raw mode was entered and restored.

use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tether_client::{TerminalDriver, TerminalEndpoint, TerminalMode};
use tether_core::Dimensions;

/// A fake terminal device.
#[derive(Debug)]
pub struct FakeTerminal {
    is_terminal: bool,
    size: Mutex<Dimensions>,
    raw: AtomicBool,
    enters: AtomicUsize,
    restores: AtomicUsize,
    size_reads: AtomicUsize,
    fail_enter: AtomicBool,
    fail_restore: AtomicBool,
}

impl FakeTerminal {
    /// A terminal with default dimensions (80x24).
    pub fn new() -> Self {
        Self::with_size(24, 80)
    }

    /// A terminal with the given dimensions.
    pub fn with_size(rows: u16, cols: u16) -> Self {
        Self {
            is_terminal: true,
            size: Mutex::new(Dimensions::new(rows, cols)),
            raw: AtomicBool::new(false),
            enters: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
            size_reads: AtomicUsize::new(0),
            fail_enter: AtomicBool::new(false),
            fail_restore: AtomicBool::new(false),
        }
    }

    /// A stream that is not a terminal (pipe, file).
    pub fn not_a_terminal() -> Self {
        Self {
            is_terminal: false,
            ..Self::new()
        }
    }

    /// Make `enter_raw` fail.
    pub fn failing_enter(self) -> Self {
        self.fail_enter.store(true, Ordering::SeqCst);
        self
    }

    /// Make `restore` fail.
    pub fn failing_restore(self) -> Self {
        self.fail_restore.store(true, Ordering::SeqCst);
        self
    }

    /// Build an endpoint over this terminal.
    pub fn endpoint(self: &Arc<Self>) -> TerminalEndpoint {
        TerminalEndpoint::with_driver(self.clone())
    }

    /// Change the reported size, as a window resize would.
    pub fn resize(&self, rows: u16, cols: u16) {
        *self.size.lock().unwrap() = Dimensions::new(rows, cols);
    }

    /// Whether the device is currently in raw mode.
    pub fn is_raw(&self) -> bool {
        self.raw.load(Ordering::SeqCst)
    }

    pub fn enter_count(&self) -> usize {
        self.enters.load(Ordering::SeqCst)
    }

    pub fn restore_count(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn size_reads(&self) -> usize {
        self.size_reads.load(Ordering::SeqCst)
    }
}

impl Default for FakeTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalDriver for FakeTerminal {
    fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    fn enter_raw(&self) -> io::Result<TerminalMode> {
        self.enters.fetch_add(1, Ordering::SeqCst);
        if self.fail_enter.load(Ordering::SeqCst) {
            return Err(io::Error::other("fake tcsetattr failure"));
        }
        self.raw.store(true, Ordering::SeqCst);
        Ok(TerminalMode::emulated())
    }

    fn restore(&self, _mode: &TerminalMode) -> io::Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(io::Error::other("fake tcsetattr failure"));
        }
        self.raw.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> io::Result<Dimensions> {
        self.size_reads.fetch_add(1, Ordering::SeqCst);
        if !self.is_terminal {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "not a terminal"));
        }
        Ok(*self.size.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_mode_changes() {
        let terminal = Arc::new(FakeTerminal::new());
        let endpoint = terminal.endpoint();

        endpoint.enter_raw_mode().unwrap();
        assert!(terminal.is_raw());
        endpoint.restore_raw_mode().unwrap();
        assert!(!terminal.is_raw());

        assert_eq!(terminal.enter_count(), 1);
        assert_eq!(terminal.restore_count(), 1);
    }

    #[test]
    fn not_a_terminal_skips_raw_mode() {
        let terminal = Arc::new(FakeTerminal::not_a_terminal());
        let endpoint = terminal.endpoint();

        endpoint.enter_raw_mode().unwrap();
        endpoint.restore_raw_mode().unwrap();
        assert_eq!(terminal.enter_count(), 0);
        assert_eq!(terminal.restore_count(), 0);
    }

    #[test]
    fn resize_changes_reported_size() {
        let terminal = Arc::new(FakeTerminal::new());
        terminal.resize(50, 132);
        assert_eq!(terminal.size().unwrap(), Dimensions::new(50, 132));
        assert_eq!(terminal.size_reads(), 1);
    }
}
