//! Where request failures go when nobody handles them explicitly.

use crate::request::Failure;

/// Console-equivalent sink for failures.
pub trait Diagnostics: Send + Sync {
    /// Report that `command` failed. Must not panic.
    fn report(&self, command: &str, failure: &Failure);
}

/// Default sink: an error-level tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, command: &str, failure: &Failure) {
        tracing::error!(
            target: "invoke_bridge::console",
            command,
            failure = %failure,
            "Command failed"
        );
    }
}
