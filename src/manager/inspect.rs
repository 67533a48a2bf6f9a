// ABOUTME: Templated container inspection and pipe-delimited field parsing.
// ABOUTME: Shared by the manager facade and the events monitor death path.

use crate::exec::{CommandExecutor, ExecError};
use crate::types::ContainerId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Go-template handing back one pipe-delimited line per container.
pub(crate) const INSPECT_FORMAT: &str = "{{.Id}}|{{.Name}}|{{.Config.Image}}|{{.State.Status}}|{{.Created}}|{{.State.StartedAt}}|{{.State.FinishedAt}}|{{.State.ExitCode}}";

/// Sentinel the template engine emits for missing fields.
const NO_VALUE: &str = "<no value>";

/// Canonical container status. Unknown engine strings map to `Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
}

impl ContainerStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Exited,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

/// A fresh snapshot of one container; never cached.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    /// Name with any leading path separator stripped.
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Engines normally report this, but it degrades to absent like the
    /// other times when the template emits its sentinel or the zero time.
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
}

/// Parse one templated inspect line into a snapshot.
///
/// Fewer fields than the schema requires yields `None`; individual fields
/// degrade to absent on the `<no value>` sentinel or the zero time.
pub fn parse_inspect_line(line: &str) -> Option<ContainerInfo> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if fields.len() < 8 {
        return None;
    }

    let field = |i: usize| -> Option<&str> {
        let v = fields[i].trim();
        (!v.is_empty() && v != NO_VALUE).then_some(v)
    };
    let time_field = |i: usize| -> Option<DateTime<Utc>> {
        field(i)
            .filter(|v| !v.starts_with("0001-01-01"))
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    };

    Some(ContainerInfo {
        id: ContainerId::new(field(0)?),
        name: field(1)
            .map(|n| n.strip_prefix('/').unwrap_or(n).to_string())
            .unwrap_or_default(),
        image: field(2).unwrap_or_default().to_string(),
        status: ContainerStatus::parse(field(3).unwrap_or_default()),
        created_at: time_field(4),
        started_at: time_field(5),
        finished_at: time_field(6),
        exit_code: field(7).and_then(|v| v.parse().ok()),
    })
}

/// Runs the templated inspect against one engine binary.
#[derive(Debug, Clone)]
pub(crate) struct Inspector {
    executor: CommandExecutor,
    program: String,
}

impl Inspector {
    pub(crate) fn new(executor: CommandExecutor, program: String) -> Self {
        Self { executor, program }
    }

    /// Fetch a fresh snapshot. A failed command or malformed output yields
    /// `Ok(None)`; only a spawn failure surfaces as an error.
    pub(crate) async fn container_info(
        &self,
        id: &str,
    ) -> Result<Option<ContainerInfo>, ExecError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            INSPECT_FORMAT.to_string(),
            id.to_string(),
        ];
        let out = self.executor.run(&self.program, &args).await?;
        if !out.success() {
            tracing::debug!("inspect of {id} failed: {}", out.stderr.trim());
            return Ok(None);
        }
        Ok(out.stdout.lines().next().and_then(parse_inspect_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_LINE: &str = "cafebabe1234|/apex-task-123|node:20-alpine|running|2024-05-01T10:00:00Z|2024-05-01T10:00:01.5Z|<no value>|0";

    #[test]
    fn parses_a_full_line() {
        let info = parse_inspect_line(FULL_LINE).expect("parse");
        assert_eq!(info.id.as_str(), "cafebabe1234");
        assert_eq!(info.name, "apex-task-123");
        assert_eq!(info.image, "node:20-alpine");
        assert_eq!(info.status, ContainerStatus::Running);
        assert!(info.created_at.is_some());
        assert!(info.started_at.is_some());
        assert_eq!(info.finished_at, None);
        assert_eq!(info.exit_code, Some(0));
    }

    #[test]
    fn too_few_fields_yields_none() {
        assert!(parse_inspect_line("a|b|c").is_none());
        assert!(parse_inspect_line("").is_none());
    }

    #[test]
    fn unknown_status_maps_to_exited() {
        let line = FULL_LINE.replace("running", "weird-state");
        let info = parse_inspect_line(&line).expect("parse");
        assert_eq!(info.status, ContainerStatus::Exited);
    }

    #[test]
    fn zero_time_counts_as_absent() {
        let line = FULL_LINE.replace("2024-05-01T10:00:01.5Z", "0001-01-01T00:00:00Z");
        let info = parse_inspect_line(&line).expect("parse");
        assert_eq!(info.started_at, None);
    }

    #[test]
    fn missing_id_yields_none() {
        let line = FULL_LINE.replace("cafebabe1234", "<no value>");
        assert!(parse_inspect_line(&line).is_none());
    }
}
