// ABOUTME: Container configuration and per-operation option structs.
// ABOUTME: Every optional field is enumerated with an explicit default.

use crate::types::{ContainerId, ImageRef};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::inspect::ContainerInfo;

/// Configuration for creating a container.
///
/// An immutable value supplied by the caller; the engine never persists it.
/// Maps use `BTreeMap` so the generated flags come out in a stable order.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Image to run (replaced by the built tag when a Dockerfile build succeeds).
    pub image: ImageRef,
    /// Optional Dockerfile to build the image from.
    pub dockerfile: Option<PathBuf>,
    /// Build context directory; defaults to the Dockerfile's parent.
    pub build_context: Option<PathBuf>,
    /// Tag for the built image; defaults to `<image name>:apex-build`.
    pub image_tag: Option<String>,
    /// Volume mapping, host path to container path. Keys are unique.
    pub volumes: BTreeMap<String, String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Resource limits.
    pub resources: ResourceLimits,
    /// Security settings.
    pub security: SecuritySettings,
    /// Network mode (`bridge`, `host`, `none`, ...).
    pub network_mode: Option<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Entrypoint override.
    pub entrypoint: Option<String>,
    /// Command to run (after the image reference).
    pub command: Vec<String>,
    /// Remove the container automatically when it exits.
    pub auto_remove: bool,
    /// Budget for dependency installation inside the container; consumed by
    /// the orchestration layer, passed through here untouched.
    pub install_timeout: Option<Duration>,
}

impl ContainerConfig {
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            dockerfile: None,
            build_context: None,
            image_tag: None,
            volumes: BTreeMap::new(),
            env: BTreeMap::new(),
            resources: ResourceLimits::default(),
            security: SecuritySettings::default(),
            network_mode: None,
            working_dir: None,
            entrypoint: None,
            command: Vec::new(),
            auto_remove: false,
            install_timeout: None,
        }
    }
}

/// Resource limits, each mapping to one engine flag when set.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Relative CPU weight (`--cpu-shares`).
    pub cpu_shares: Option<u64>,
    /// CPU quota in whole CPUs (`--cpus`).
    pub cpu_quota: Option<f64>,
    /// Memory limit in engine notation, e.g. `"512m"` (`--memory`).
    pub memory: Option<String>,
    /// Soft memory limit (`--memory-reservation`).
    pub memory_reservation: Option<String>,
    /// Memory plus swap limit (`--memory-swap`).
    pub memory_swap: Option<String>,
    /// Maximum process count (`--pids-limit`).
    pub pids_limit: Option<u64>,
}

/// Security settings, each mapping to one engine flag when set.
#[derive(Debug, Clone, Default)]
pub struct SecuritySettings {
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
}

/// Request for the create (and optionally build-then-create) flow.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub config: ContainerConfig,
    /// Task this container belongs to; embedded in the generated name.
    pub task_id: String,
    /// Start the container immediately after creating it. Default `false`.
    pub auto_start: bool,
    /// Use this exact name instead of deriving one from the task id.
    pub name_override: Option<String>,
}

impl CreateRequest {
    pub fn new(config: ContainerConfig, task_id: impl Into<String>) -> Self {
        Self {
            config,
            task_id: task_id.into(),
            auto_start: false,
            name_override: None,
        }
    }
}

/// Options for stopping a container.
#[derive(Debug, Clone)]
pub struct StopOptions {
    /// Grace period before the engine kills the container. Default 10s.
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Options for removing a container.
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Remove even if running (`--force`). Default `false`.
    pub force: bool,
}

/// Outcome of a mutating container operation.
///
/// Mutating operations report failure here instead of returning errors, so
/// callers always receive the container identity alongside any error text.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub success: bool,
    pub container_id: Option<ContainerId>,
    pub container_name: Option<String>,
    /// Fresh snapshot where the operation re-queries the container.
    pub info: Option<ContainerInfo>,
    /// The most specific underlying failure, with engine stderr embedded.
    pub error: Option<String>,
    /// Non-fatal notes, e.g. a compensating cleanup attempt.
    pub warnings: Vec<String>,
}

impl OperationResult {
    pub fn succeeded(container_id: ContainerId) -> Self {
        Self {
            success: true,
            container_id: Some(container_id),
            container_name: None,
            info: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            container_id: None,
            container_name: None,
            info: None,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}
