// ABOUTME: Typed container lifecycle events and subscription plumbing.
// ABOUTME: An exhaustive enum over a broadcast channel; no string-keyed emitters.

use crate::types::ContainerId;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::inspect::ContainerInfo;

/// Everything the manager publishes about container lifecycles.
///
/// Matching on this enum is exhaustive; adding a variant is a compile-time
/// signal to every subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerEvent {
    /// A container was created through this manager.
    Created {
        container_id: ContainerId,
        name: String,
        task_id: Option<String>,
    },
    /// A container was started through this manager.
    Started { container_id: ContainerId },
    /// The events monitor observed a container death.
    Died(ContainerDiedEvent),
    /// Generic notification fired alongside specific events, carrying an
    /// operation tag for listeners that do not care which one.
    Lifecycle(LifecycleNotification),
    /// The events-monitor stream failed; monitoring has ended.
    MonitorError { message: String },
    /// The events-monitor stream reached end of stream; monitoring has ended.
    MonitorEnded,
}

/// A container death, normalized across engines.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerDiedEvent {
    pub container_id: ContainerId,
    /// Task id recovered from the container name, if it follows the
    /// `apex-<taskId>` convention.
    pub task_id: Option<String>,
    /// Exit code reported by the engine; `1` when absent or unparseable.
    pub exit_code: i64,
    /// Explicit signal attribute, or `"SIGKILL"` inferred from exit code 137.
    pub signal: Option<String>,
    pub oom_killed: bool,
    pub timestamp: DateTime<Utc>,
    /// Best-effort snapshot; `None` when the lookup failed.
    pub container_info: Option<ContainerInfo>,
}

/// Operation-tagged notification for generic listeners.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleNotification {
    /// Operation tag, e.g. `"created"`, `"started"`, `"died"`.
    pub operation: String,
    pub container_id: ContainerId,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleNotification {
    pub(crate) fn now(operation: &str, container_id: ContainerId) -> Self {
        Self {
            operation: operation.to_string(),
            container_id,
            timestamp: Utc::now(),
        }
    }
}
