//! Progress reporting for the setup pipeline
//!
//! The orchestrator emits an event at every phase boundary through the
//! [`ProgressReporter`] contract; a CLI, a TUI, or a test records them as
//! it sees fit.

#[cfg(test)]
use mockall::automock;
use tracing::info;

/// Observability sink for the orchestrator's phase progression
#[cfg_attr(test, automock)]
pub trait ProgressReporter: Send + Sync {
    /// A phase boundary was crossed: `step` of `total`, entering `phase`
    fn report(&self, step: usize, total: usize, phase: &str);

    /// A multi-item activity began
    fn start(&self, total: usize, description: &str);

    /// An item within the current activity completed
    fn update(&self, current: usize, status: &str);

    /// The current activity finished
    fn finish(&self, success: bool, message: &str);
}

/// Reporter that logs progress through `tracing`
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// Create a new console reporter
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, step: usize, total: usize, phase: &str) {
        info!(step, total, phase, "phase boundary");
    }

    fn start(&self, total: usize, description: &str) {
        info!(total, description, "starting");
    }

    fn update(&self, current: usize, status: &str) {
        info!(current, status, "progress");
    }

    fn finish(&self, success: bool, message: &str) {
        info!(success, message, "finished");
    }
}
