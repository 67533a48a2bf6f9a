// ABOUTME: Unified runtime error with SNAFU pattern.
// ABOUTME: Wraps stream-setup failures for programmatic handling.

use snafu::Snafu;

use crate::manager::events::EventsError;
use crate::manager::logs::LogError;

/// Unified error for operations that cannot return a degraded result:
/// selecting a runtime and setting up the long-lived streams.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RuntimeError {
    #[snafu(display("no usable container runtime (checked docker and podman)"))]
    Unavailable,

    #[snafu(display("events monitoring failed: {source}"))]
    Events { source: EventsError },

    #[snafu(display("log streaming failed: {source}"))]
    Logs { source: LogError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// No engine is installed and functional.
    RuntimeUnavailable,
    /// The events-monitor process could not be set up.
    EventsMonitor,
    /// A log-stream process could not be set up.
    LogStream,
}

impl RuntimeError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> RuntimeErrorKind {
        match self {
            RuntimeError::Unavailable => RuntimeErrorKind::RuntimeUnavailable,
            RuntimeError::Events { .. } => RuntimeErrorKind::EventsMonitor,
            RuntimeError::Logs { .. } => RuntimeErrorKind::LogStream,
        }
    }
}

