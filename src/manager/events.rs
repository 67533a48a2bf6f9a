// ABOUTME: Runtime-wide lifecycle event monitoring over `<engine> events`.
// ABOUTME: Frames NDJSON, normalizes engine schemas, derives death events.

use crate::exec::CommandExecutor;
use crate::types::ContainerId;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use super::event::{ContainerDiedEvent, ContainerEvent, LifecycleNotification};
use super::inspect::Inspector;
use super::naming::extract_task_id;

/// Errors from setting up events monitoring.
#[derive(Debug, Error)]
pub enum EventsError {
    #[error("could not start events monitoring: {0}")]
    Spawn(String),

    #[error("events process came up without a stdout pipe")]
    NoStdout,
}

/// Filters applied to the engine's event stream.
#[derive(Debug, Clone, Default)]
pub struct EventsMonitorOptions {
    /// Restrict to containers whose name starts with `<prefix>-`.
    pub name_prefix: Option<String>,
    /// Event kinds to request from the engine. Empty means all kinds.
    pub event_types: BTreeSet<String>,
    /// Label filters, each rendered as `--filter label=k=v`.
    pub label_filters: BTreeMap<String, String>,
}

/// A lifecycle event normalized across engine schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEvent {
    pub kind: String,
    pub container_id: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

/// Normalize one raw event object into the canonical shape.
///
/// The primary engine reports `status`/`id`/`time` (seconds); the secondary
/// reports `Action`/`ID`/`timeNano` (nanoseconds). Both nest attributes
/// under `Actor.Attributes`. Returns `None` for unrecognized shapes.
pub fn normalize_event(value: &Value) -> Option<RuntimeEvent> {
    let obj = value.as_object()?;

    let (kind, container_id, timestamp) = if let Some(status) = obj.get("status") {
        (
            status.as_str()?.to_string(),
            obj.get("id")?.as_str()?.to_string(),
            obj.get("time")
                .and_then(Value::as_i64)
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now),
        )
    } else {
        (
            obj.get("Action")?.as_str()?.to_string(),
            obj.get("ID")?.as_str()?.to_string(),
            obj.get("timeNano")
                .and_then(Value::as_i64)
                .and_then(|nanos| {
                    DateTime::from_timestamp(
                        nanos.div_euclid(1_000_000_000),
                        nanos.rem_euclid(1_000_000_000) as u32,
                    )
                })
                .unwrap_or_else(Utc::now),
        )
    };

    let attributes = obj
        .get("Actor")
        .and_then(|actor| actor.get("Attributes"))
        .and_then(Value::as_object)
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(RuntimeEvent {
        kind,
        container_id,
        timestamp,
        attributes,
    })
}

/// Derive the death signal: an explicit attribute always wins; exit code 137
/// implies SIGKILL; anything else carries no signal. Exit code 143 is
/// deliberately left unmapped under the current rules.
pub fn death_signal(exit_code: i64, explicit: Option<&str>) -> Option<String> {
    match explicit {
        Some(signal) => Some(signal.to_string()),
        None if exit_code == 137 => Some("SIGKILL".to_string()),
        None => None,
    }
}

/// OOM detection from event attributes, independent of signal derivation.
pub fn death_oom(attributes: &BTreeMap<String, String>) -> bool {
    attributes.get("oomkilled").is_some_and(|v| v == "true")
        || attributes.get("reason").is_some_and(|v| v == "oom")
}

/// Frames NDJSON event output into parsed JSON values.
///
/// Correct regardless of where the stream chunks a JSON object, including
/// mid-token; a partial trailing line is retained for the next chunk.
#[derive(Debug, Default)]
pub struct EventFramer {
    buf: BytesMut,
    scan_from: usize,
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it, in arrival
    /// order. Malformed lines are logged and skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            let Some(rel) = self.buf[self.scan_from..].iter().position(|&b| b == b'\n') else {
                self.scan_from = self.buf.len();
                break;
            };
            let end = self.scan_from + rel;
            let line = self.buf.split_to(end + 1);
            self.scan_from = 0;
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str(text) {
                Ok(value) => events.push(value),
                Err(e) => tracing::warn!("skipping malformed event line: {e}"),
            }
        }
        events
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scan_from = 0;
    }
}

struct ActiveMonitor {
    child: Child,
    reader: JoinHandle<()>,
    /// Cleared by the reader when the stream ends, so liveness tracks the
    /// process rather than the handle.
    alive: Arc<AtomicBool>,
}

/// Owns the single `<engine> events` process for a manager.
///
/// `start` while active is a no-op; `stop` signals the child and clears the
/// framing state. Only death events are acted on today; other kinds pass
/// the filter set but are reserved.
pub struct EventsMonitor {
    executor: CommandExecutor,
    program: String,
    options: EventsMonitorOptions,
    inspector: Inspector,
    events_tx: broadcast::Sender<ContainerEvent>,
    active: Mutex<Option<ActiveMonitor>>,
}

impl EventsMonitor {
    pub(crate) fn new(
        executor: CommandExecutor,
        program: String,
        inspector: Inspector,
        options: EventsMonitorOptions,
        events_tx: broadcast::Sender<ContainerEvent>,
    ) -> Self {
        Self {
            executor,
            program,
            options,
            inspector,
            events_tx,
            active: Mutex::new(None),
        }
    }

    /// Render the engine arguments for the configured filters.
    pub fn build_args(options: &EventsMonitorOptions) -> Vec<String> {
        let mut args = vec![
            "events".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        for kind in &options.event_types {
            args.push("--filter".to_string());
            args.push(format!("event={kind}"));
        }
        if let Some(prefix) = &options.name_prefix {
            args.push("--filter".to_string());
            args.push(format!("container={prefix}-*"));
        }
        for (key, value) in &options.label_filters {
            args.push("--filter".to_string());
            args.push(format!("label={key}={value}"));
        }
        args
    }

    /// Start the monitor process. A no-op while one is already live; a
    /// monitor whose process has exited is replaced by a fresh one.
    pub async fn start(&self) -> Result<(), EventsError> {
        let mut guard = self.active.lock().await;
        if let Some(active) = guard.as_ref()
            && active.alive.load(Ordering::SeqCst)
        {
            tracing::debug!("events monitor already active, ignoring start");
            return Ok(());
        }

        let args = Self::build_args(&self.options);
        let mut child = self.executor.spawn(&self.program, &args).map_err(|e| {
            EventsError::Spawn(format!("could not launch {} events: {e}", self.program))
        })?;
        let stdout = child.stdout.take().ok_or(EventsError::NoStdout)?;

        let alive = Arc::new(AtomicBool::new(true));
        let inspector = self.inspector.clone();
        let tx = self.events_tx.clone();
        let reader = tokio::spawn(read_events(stdout, inspector, tx, Arc::clone(&alive)));

        *guard = Some(ActiveMonitor {
            child,
            reader,
            alive,
        });
        tracing::info!("events monitoring started via {}", self.program);
        Ok(())
    }

    /// Signal the monitor process and drop all framing state. Idempotent.
    pub async fn stop(&self) {
        let mut guard = self.active.lock().await;
        let Some(active) = guard.take() else {
            return;
        };
        active.alive.store(false, Ordering::SeqCst);
        if let Some(pid) = active.child.id() {
            CommandExecutor::terminate(pid);
        }
        active.reader.abort();
        // Reap off to the side; the process gets killed with the handle if
        // it outlives the runtime.
        let mut child = active.child;
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        tracing::info!("events monitoring stopped");
    }

    /// Whether the monitor process is still alive and being read.
    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| active.alive.load(Ordering::SeqCst))
    }
}

async fn read_events(
    mut stdout: ChildStdout,
    inspector: Inspector,
    tx: broadcast::Sender<ContainerEvent>,
    alive: Arc<AtomicBool>,
) {
    let mut framer = EventFramer::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => {
                tracing::warn!("events stream ended, monitoring is no longer active");
                alive.store(false, Ordering::SeqCst);
                let _ = tx.send(ContainerEvent::MonitorEnded);
                break;
            }
            Ok(n) => {
                for value in framer.push(&chunk[..n]) {
                    if let Some(event) = normalize_event(&value) {
                        handle_event(event, &inspector, &tx).await;
                    }
                }
            }
            Err(e) => {
                alive.store(false, Ordering::SeqCst);
                let _ = tx.send(ContainerEvent::MonitorError {
                    message: e.to_string(),
                });
                break;
            }
        }
    }
}

async fn handle_event(
    event: RuntimeEvent,
    inspector: &Inspector,
    tx: &broadcast::Sender<ContainerEvent>,
) {
    // Death is the only kind acted on; the rest are reserved.
    if event.kind != "die" && event.kind != "died" {
        return;
    }

    let container_info = match inspector.container_info(&event.container_id).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(
                "container info lookup failed for {}: {e}",
                event.container_id
            );
            None
        }
    };

    let name = event
        .attributes
        .get("name")
        .map(String::as_str)
        .or_else(|| container_info.as_ref().map(|i| i.name.as_str()))
        .unwrap_or_default();
    let task_id = extract_task_id(name);

    let exit_code = event
        .attributes
        .get("exitCode")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let signal = death_signal(exit_code, event.attributes.get("signal").map(String::as_str));

    let died = ContainerDiedEvent {
        container_id: ContainerId::new(event.container_id),
        task_id,
        exit_code,
        signal,
        oom_killed: death_oom(&event.attributes),
        timestamp: event.timestamp,
        container_info,
    };

    tracing::info!(
        "container {} died (exit code {}, oom: {})",
        died.container_id.short(),
        died.exit_code,
        died.oom_killed
    );
    let lifecycle = LifecycleNotification::now("died", died.container_id.clone());
    let _ = tx.send(ContainerEvent::Died(died));
    let _ = tx.send(ContainerEvent::Lifecycle(lifecycle));
}
