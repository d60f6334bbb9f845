//! tether-core: Shared library for the tether attach bridge.
//!
//! This crate provides:
//! - Error taxonomy for attach sessions
//! - Terminal dimensions
//! - Detach key parsing
//! - Session configuration and tuning constants
//! - Logging setup

pub mod config;
pub mod constants;
pub mod detach_keys;
pub mod error;
pub mod logging;
pub mod types;

pub use config::SessionConfig;
pub use detach_keys::DetachKeys;
pub use error::{Direction, Error, Result};
pub use logging::{LogFormat, init_logging};
pub use types::Dimensions;
