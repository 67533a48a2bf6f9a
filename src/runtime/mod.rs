// ABOUTME: Container runtime detection and telemetry parsing.
// ABOUTME: Probes Docker and Podman CLIs and normalizes their output.

mod detection;
mod stats;
mod types;

pub use detection::{
    CompatibilityReport, RuntimeDetector, VersionRequirements, compare_versions,
};
pub use stats::{
    ContainerStats, parse_byte_pair, parse_bytes, parse_count, parse_percent, parse_stats_row,
};
pub use types::{EnginePaths, RuntimeInfo, RuntimeKind, RuntimeVersion};
