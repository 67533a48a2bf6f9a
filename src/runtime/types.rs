// ABOUTME: Runtime type definitions for Docker and Podman.
// ABOUTME: RuntimeKind enum, version/availability info, engine path overrides.

use crate::exec::CommandExecutor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The container engine being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    /// Fallback priority when no preference is given.
    pub const PRIORITY: [RuntimeKind; 2] = [RuntimeKind::Docker, RuntimeKind::Podman];

    /// The CLI binary name for this engine.
    pub fn program(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

/// Parsed engine version information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeVersion {
    /// Numeric version, e.g. "24.0.7", or "unknown" if nothing matched.
    pub version: String,
    /// Build identifier if the engine reports one.
    pub build_info: Option<String>,
    /// The raw first line of the version probe.
    pub full_version: String,
}

/// Result of probing a single engine.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    pub kind: RuntimeKind,
    /// True only when both the version probe and the functional probe passed.
    pub available: bool,
    pub version: Option<RuntimeVersion>,
    pub error: Option<String>,
}

/// Explicit engine binary locations, overriding PATH lookup.
#[derive(Debug, Clone, Default)]
pub struct EnginePaths {
    pub docker: Option<PathBuf>,
    pub podman: Option<PathBuf>,
}

impl EnginePaths {
    /// The program to invoke for an engine: the configured path if present,
    /// otherwise the platform-resolved binary name.
    pub fn program(&self, kind: RuntimeKind) -> String {
        let configured = match kind {
            RuntimeKind::Docker => self.docker.as_ref(),
            RuntimeKind::Podman => self.podman.as_ref(),
        };
        match configured {
            Some(path) => path.display().to_string(),
            None => CommandExecutor::resolve_program(kind.program()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_kind_serde_roundtrip() {
        let json = serde_json::to_string(&RuntimeKind::Podman).expect("serialize");
        assert_eq!(json, "\"podman\"");
        let back: RuntimeKind = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, RuntimeKind::Podman);
    }

    #[test]
    fn engine_paths_override_takes_precedence() {
        let paths = EnginePaths {
            docker: Some(PathBuf::from("/opt/engines/docker")),
            podman: None,
        };
        assert_eq!(paths.program(RuntimeKind::Docker), "/opt/engines/docker");
        assert_eq!(
            paths.program(RuntimeKind::Podman),
            CommandExecutor::resolve_program("podman")
        );
    }
}
