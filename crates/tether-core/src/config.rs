//! Per-session configuration.

use std::time::Duration;

use crate::constants::{COPY_BUFFER_SIZE, RESIZE_RETRIES, RESIZE_RETRY_INTERVAL};
use crate::detach_keys::DetachKeys;

/// Settings for one attach session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Key sequence that detaches without stopping the remote process.
    pub detach_keys: DetachKeys,
    /// Read buffer size for each copy direction.
    pub buffer_size: usize,
    /// Background attempts after the initial resize fails.
    pub resize_retries: u32,
    /// Base step of the resize retry schedule.
    pub resize_retry_interval: Duration,
    /// Follow local window changes for the session lifetime.
    pub watch_resize: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detach_keys: DetachKeys::default(),
            buffer_size: COPY_BUFFER_SIZE,
            resize_retries: RESIZE_RETRIES,
            resize_retry_interval: RESIZE_RETRY_INTERVAL,
            watch_resize: true,
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the detach key sequence.
    pub fn with_detach_keys(mut self, keys: DetachKeys) -> Self {
        self.detach_keys = keys;
        self
    }

    /// Set the copy buffer size (at least one byte).
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Set the resize retry schedule.
    pub fn with_resize_retries(mut self, retries: u32, interval: Duration) -> Self {
        self.resize_retries = retries;
        self.resize_retry_interval = interval;
        self
    }

    /// Enable or disable following window changes.
    pub fn with_watch_resize(mut self, watch: bool) -> Self {
        self.watch_resize = watch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.detach_keys.as_bytes(), &[0x10, 0x11]);
        assert_eq!(config.buffer_size, 32 * 1024);
        assert_eq!(config.resize_retries, 5);
        assert_eq!(config.resize_retry_interval, Duration::from_millis(10));
        assert!(config.watch_resize);
    }

    #[test]
    fn builder_overrides() {
        let config = SessionConfig::new()
            .with_detach_keys(DetachKeys::none())
            .with_buffer_size(0)
            .with_resize_retries(2, Duration::from_millis(1))
            .with_watch_resize(false);

        assert!(config.detach_keys.is_empty());
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.resize_retries, 2);
        assert_eq!(config.resize_retry_interval, Duration::from_millis(1));
        assert!(!config.watch_resize);
    }
}
