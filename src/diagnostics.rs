//! Warning sinks.
//!
//! Each decode session and encode request owns a handle to one sink. There is
//! no process-wide callback.

use std::cell::RefCell;

use crate::error::Warning;

/// Receives non-fatal conditions raised while decoding or encoding.
pub trait Diagnostics {
    fn warn(&self, warning: &Warning);
}

/// Forwards warnings to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn warn(&self, warning: &Warning) {
        log::warn!("pngflow: {warning}");
    }
}

/// Records warnings in memory.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    warnings: RefCell<Vec<Warning>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings received so far, oldest first.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.borrow().is_empty()
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn warn(&self, warning: &Warning) {
        log::debug!("pngflow: collected warning: {warning}");
        self.warnings.borrow_mut().push(warning.clone());
    }
}
