//! Once-only raw mode restoration.
//!
//! Both copy directions, the orchestrator teardown and `Drop` may all try to
//! put the terminal back. `RawModeGuard` funnels them through one `Once`, so
//! the endpoint is restored at most once per session.

use std::sync::{Arc, Once};

use tracing::warn;

use tether_core::Result;

use crate::terminal::TerminalEndpoint;

struct Inner {
    endpoint: Arc<TerminalEndpoint>,
    once: Once,
}

impl Inner {
    fn restore(&self) {
        self.once.call_once(|| {
            if let Err(e) = self.endpoint.restore_raw_mode() {
                warn!(error = %e, "Failed to restore terminal");
            }
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Shared handle that restores the terminal the first time it is asked to.
///
/// Clones share the same once-guard. The terminal is also restored when the
/// last clone is dropped.
#[derive(Clone)]
pub struct RawModeGuard {
    inner: Arc<Inner>,
}

impl RawModeGuard {
    /// Enter raw mode on `endpoint`.
    ///
    /// On failure the error is returned and no guard exists, so nothing
    /// will try to restore a mode that was never captured.
    pub fn enter(endpoint: Arc<TerminalEndpoint>) -> Result<Self> {
        endpoint.enter_raw_mode()?;
        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                once: Once::new(),
            }),
        })
    }

    /// Restore the terminal; every call after the first is a no-op.
    pub fn restore(&self) {
        self.inner.restore();
    }

    /// Whether restoration has already run.
    pub fn is_restored(&self) -> bool {
        self.inner.once.is_completed()
    }
}

impl std::fmt::Debug for RawModeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawModeGuard")
            .field("restored", &self.is_restored())
            .finish()
    }
}
