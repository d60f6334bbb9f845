//! Tuning constants for attach sessions.

use std::time::Duration;

// =============================================================================
// Stream Constants
// =============================================================================

/// Buffer size for each copy direction.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

// =============================================================================
// Resize Constants
// =============================================================================

/// Background attempts after the initial resize fails.
pub const RESIZE_RETRIES: u32 = 5;

/// Base step of the initial resize retry schedule; attempt `n` waits `n` steps.
pub const RESIZE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Detach Constants
// =============================================================================

/// Default key sequence that detaches from a session without stopping it.
pub const DEFAULT_DETACH_KEYS: &str = "ctrl-p,ctrl-q";
