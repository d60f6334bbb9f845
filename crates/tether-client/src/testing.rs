//! In-crate terminal fake for unit tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_core::Dimensions;

use crate::raw_mode::RawModeGuard;
use crate::terminal::{TerminalDriver, TerminalEndpoint, TerminalMode};

/// Terminal driver that counts mode switches, with an adjustable size and
/// optional enter/restore failures.
pub struct CountingTerminal {
    size: Mutex<Dimensions>,
    fail_enter: bool,
    fail_restore: bool,
    enters: AtomicUsize,
    restores: AtomicUsize,
}

impl Default for CountingTerminal {
    fn default() -> Self {
        Self::sized(24, 80)
    }
}

impl CountingTerminal {
    pub fn sized(rows: u16, cols: u16) -> Self {
        Self {
            size: Mutex::new(Dimensions::new(rows, cols)),
            fail_enter: false,
            fail_restore: false,
            enters: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
        }
    }

    pub fn failing_enter() -> Self {
        Self {
            fail_enter: true,
            ..Self::default()
        }
    }

    pub fn failing_restore() -> Self {
        Self {
            fail_restore: true,
            ..Self::default()
        }
    }

    pub fn set_size(&self, rows: u16, cols: u16) {
        *self.size.lock().unwrap() = Dimensions::new(rows, cols);
    }

    pub fn enters(&self) -> usize {
        self.enters.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn endpoint(self: &Arc<Self>) -> Arc<TerminalEndpoint> {
        Arc::new(TerminalEndpoint::with_driver(self.clone()))
    }
}

impl TerminalDriver for CountingTerminal {
    fn is_terminal(&self) -> bool {
        true
    }

    fn enter_raw(&self) -> io::Result<TerminalMode> {
        self.enters.fetch_add(1, Ordering::SeqCst);
        if self.fail_enter {
            return Err(io::Error::other("tcsetattr failed"));
        }
        Ok(TerminalMode::emulated())
    }

    fn restore(&self, _mode: &TerminalMode) -> io::Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore {
            return Err(io::Error::other("tcsetattr failed"));
        }
        Ok(())
    }

    fn size(&self) -> io::Result<Dimensions> {
        Ok(*self.size.lock().unwrap())
    }
}

/// A guard in raw mode over a counting terminal.
pub fn counting_guard() -> (Arc<CountingTerminal>, RawModeGuard) {
    let terminal = Arc::new(CountingTerminal::default());
    let guard = RawModeGuard::enter(terminal.endpoint()).expect("enter raw mode");
    (terminal, guard)
}
