//! [`MigrationLogger`] backed by `tracing`.
//!
//! Subscriber setup belongs to the binary.

use tracing::{error, info, warn};

use crate::core::MigrationLogger;

/// Logger port implementation that forwards to `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl MigrationLogger for TracingLogger {
    fn info(&self, message: &str) {
        info!("{}", message);
    }

    fn warning(&self, message: &str) {
        warn!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }
}
