//! Detach key sequence parsing.
//!
//! Uses the container engine convention: a comma-separated list where each
//! entry is either a single character or `ctrl-<c>`, e.g. `ctrl-p,ctrl-q`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Byte sequence that detaches from a session when typed in raw mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetachKeys {
    bytes: Vec<u8>,
}

impl DetachKeys {
    /// Detaching disabled.
    pub fn none() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Build from raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Parse a key sequence such as `ctrl-p,ctrl-q`.
    ///
    /// An empty sequence disables detaching.
    pub fn parse(keys: &str) -> Result<Self> {
        if keys.is_empty() {
            return Ok(Self::none());
        }

        let bytes = keys
            .split(',')
            .map(parse_key)
            .collect::<Result<Vec<u8>>>()?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for DetachKeys {
    fn default() -> Self {
        // ctrl-p,ctrl-q
        Self {
            bytes: vec![0x10, 0x11],
        }
    }
}

impl FromStr for DetachKeys {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DetachKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match *byte {
                0x00 => f.write_str("ctrl-@")?,
                b @ 0x01..=0x1a => write!(f, "ctrl-{}", (b'a' + b - 1) as char)?,
                0x1b => f.write_str("ctrl-[")?,
                0x1c => f.write_str("ctrl-\\")?,
                0x1d => f.write_str("ctrl-]")?,
                0x1e => f.write_str("ctrl-^")?,
                0x1f => f.write_str("ctrl-_")?,
                b => write!(f, "{}", b as char)?,
            }
        }
        Ok(())
    }
}

fn parse_key(key: &str) -> Result<u8> {
    if key.len() == 1 {
        return Ok(key.as_bytes()[0]);
    }

    let lower = key.to_ascii_lowercase();
    let Some(suffix) = lower.strip_prefix("ctrl-") else {
        return Err(unknown_key(key));
    };

    match suffix.as_bytes() {
        [b'@'] => Ok(0x00),
        [c @ b'a'..=b'z'] => Ok(c - b'a' + 1),
        [b'['] => Ok(0x1b),
        [b'\\'] => Ok(0x1c),
        [b']'] => Ok(0x1d),
        [b'^'] => Ok(0x1e),
        [b'_'] => Ok(0x1f),
        _ => Err(unknown_key(key)),
    }
}

fn unknown_key(key: &str) -> Error {
    Error::InvalidDetachKeys {
        message: format!("unknown key '{key}'"),
    }
}
