//! Value types shared by the client and its collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub rows: u16,
    pub cols: u16,
}

impl Dimensions {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// A (0, 0) reading means the size is unknown.
    pub fn is_zero(&self) -> bool {
        self.rows == 0 && self.cols == 0
    }

    /// Reject the unknown size so it is never forwarded to the remote side.
    pub fn validate(self) -> Result<Self> {
        if self.is_zero() {
            return Err(Error::InvalidSize {
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
