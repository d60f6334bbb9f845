//! Resizer that fails on cue.

use std::sync::Mutex;

use async_trait::async_trait;

use tether_client::Resizer;
use tether_core::{Dimensions, Error, Result};

/// Fails the first `failures` calls, then succeeds. Records every call.
#[derive(Debug, Default)]
pub struct ScriptedResizer {
    failures: usize,
    calls: Mutex<Vec<Dimensions>>,
}

impl ScriptedResizer {
    /// A resizer that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resizer whose first `failures` calls fail.
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A resizer that never succeeds.
    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    /// Every size it was asked to apply, in order.
    pub fn calls(&self) -> Vec<Dimensions> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Resizer for ScriptedResizer {
    async fn resize(&self, size: Dimensions) -> Result<()> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(size);
            calls.len()
        };
        if attempt <= self.failures {
            return Err(Error::Engine {
                message: format!("scripted resize failure {attempt}"),
            });
        }
        Ok(())
    }
}
