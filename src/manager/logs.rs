// ABOUTME: Live log tailing over `<engine> logs`, framed per file descriptor.
// ABOUTME: Offers broadcast push and a take-once pull stream of entries.

use crate::exec::CommandExecutor;
use crate::types::ContainerId;
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, mpsc};

use super::framing::LineFramer;

/// Capacity of the broadcast side; lagging subscribers observe a gap.
const PUSH_CAPACITY: usize = 256;
/// Capacity of the pull side; overflow drops the newest entry with a warning.
const PULL_CAPACITY: usize = 1024;

/// Errors from opening or consuming a log stream.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("could not start log streaming: {0}")]
    Spawn(String),

    #[error("log process came up without a {0} pipe")]
    MissingPipe(&'static str),

    #[error("the log entry stream was already taken")]
    EntriesTaken,
}

/// Which file descriptor a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
}

/// One log line, tagged with its source descriptor.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub source: LogSource,
    /// Line content with the trailing newline (and any timestamp prefix)
    /// removed.
    pub message: String,
    /// Parsed from the engine's timestamp prefix when `timestamps` is on.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Everything the push side publishes.
#[derive(Debug, Clone)]
pub enum LogEvent {
    Entry(LogEntry),
    /// Reading a pipe failed; the stream is winding down.
    Error { message: String },
    /// The log process exited; no further entries will arrive.
    Ended { exit_code: Option<i32> },
}

/// How many trailing lines to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    All,
    Lines(u64),
}

/// Options for tailing container logs.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Keep following new output. Default `true`.
    pub follow: bool,
    /// Ask the engine to prefix each line with an RFC 3339 timestamp.
    pub timestamps: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub tail: Tail,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: true,
            timestamps: false,
            since: None,
            until: None,
            tail: Tail::All,
        }
    }
}

/// Render the engine arguments for a log tail.
pub fn build_args(container_id: &ContainerId, options: &LogOptions) -> Vec<String> {
    let mut args = vec!["logs".to_string()];
    if options.follow {
        args.push("--follow".to_string());
    }
    if options.timestamps {
        args.push("--timestamps".to_string());
    }
    if let Some(since) = options.since {
        args.push("--since".to_string());
        args.push(since.to_rfc3339());
    }
    if let Some(until) = options.until {
        args.push("--until".to_string());
        args.push(until.to_rfc3339());
    }
    args.push("--tail".to_string());
    args.push(match options.tail {
        Tail::All => "all".to_string(),
        Tail::Lines(n) => n.to_string(),
    });
    args.push(container_id.as_str().to_string());
    args
}

/// Split a leading RFC 3339 timestamp token off a log line, if present.
pub fn split_timestamp(line: &str) -> (Option<DateTime<Utc>>, &str) {
    if let Some((token, rest)) = line.split_once(' ')
        && let Ok(ts) = DateTime::parse_from_rfc3339(token)
    {
        return (Some(ts.with_timezone(&Utc)), rest);
    }
    (None, line)
}

/// A live tail of one container's logs.
///
/// Two consumption modes run off the same process: `subscribe` hands out
/// broadcast receivers of [`LogEvent`]s, and `entries` hands out the single
/// pull stream of [`LogEntry`]s. Dropping the stream terminates the child.
pub struct LogStream {
    container_id: ContainerId,
    pid: Option<u32>,
    push_tx: Mutex<Option<broadcast::Sender<LogEvent>>>,
    entries_rx: Mutex<Option<mpsc::Receiver<LogEntry>>>,
    ended: AtomicBool,
    active: Arc<AtomicBool>,
}

impl LogStream {
    pub(crate) fn open(
        executor: &CommandExecutor,
        program: &str,
        container_id: &ContainerId,
        options: LogOptions,
    ) -> Result<Self, LogError> {
        let args = build_args(container_id, &options);
        let mut child = executor
            .spawn(program, &args)
            .map_err(|e| LogError::Spawn(format!("could not launch {program} logs: {e}")))?;
        let stdout = child.stdout.take().ok_or(LogError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LogError::MissingPipe("stderr"))?;
        let pid = child.id();

        let (push_tx, _) = broadcast::channel(PUSH_CAPACITY);
        let (entries_tx, entries_rx) = mpsc::channel(PULL_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));

        tokio::spawn(read_pipe(
            stdout,
            LogSource::Stdout,
            push_tx.clone(),
            entries_tx.clone(),
        ));
        tokio::spawn(read_pipe(
            stderr,
            LogSource::Stderr,
            push_tx.clone(),
            entries_tx,
        ));

        let wait_tx = push_tx.clone();
        let wait_active = Arc::clone(&active);
        let id = container_id.clone();
        tokio::spawn(async move {
            let event = match child.wait().await {
                Ok(status) => LogEvent::Ended {
                    exit_code: status.code(),
                },
                Err(e) => LogEvent::Error {
                    message: e.to_string(),
                },
            };
            tracing::debug!("log tail of {} finished", id.short());
            wait_active.store(false, Ordering::SeqCst);
            let _ = wait_tx.send(event);
        });

        Ok(Self {
            container_id: container_id.clone(),
            pid,
            push_tx: Mutex::new(Some(push_tx)),
            entries_rx: Mutex::new(Some(entries_rx)),
            ended: AtomicBool::new(false),
            active,
        })
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// Subscribe to the push side. `None` once the stream has been ended.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<LogEvent>> {
        self.push_tx.lock().as_ref().map(|tx| tx.subscribe())
    }

    /// Take the pull side. Returns an error on the second call.
    pub fn entries(&self) -> Result<LogEntries, LogError> {
        self.entries_rx
            .lock()
            .take()
            .map(|rx| LogEntries { rx })
            .ok_or(LogError::EntriesTaken)
    }

    /// Whether the underlying log process is still running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Terminate the tail. Idempotent; subscribers see their channel close.
    pub fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.push_tx.lock().take();
        if let Some(pid) = self.pid {
            CommandExecutor::terminate(pid);
        }
        tracing::debug!("ended log tail of {}", self.container_id.short());
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.end();
    }
}

async fn read_pipe<R>(
    mut pipe: R,
    source: LogSource,
    push_tx: broadcast::Sender<LogEvent>,
    entries_tx: mpsc::Sender<LogEntry>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in framer.push(&chunk[..n]) {
                    let (timestamp, message) = split_timestamp(&line);
                    let entry = LogEntry {
                        source,
                        message: message.to_string(),
                        timestamp,
                    };
                    let _ = push_tx.send(LogEvent::Entry(entry.clone()));
                    if let Err(mpsc::error::TrySendError::Full(_)) = entries_tx.try_send(entry) {
                        tracing::warn!("log entry queue full, dropping a {source:?} line");
                    }
                }
            }
            Err(e) => {
                let _ = push_tx.send(LogEvent::Error {
                    message: e.to_string(),
                });
                break;
            }
        }
    }
}

/// The pull side of a [`LogStream`], bounded at [`PULL_CAPACITY`] entries.
pub struct LogEntries {
    rx: mpsc::Receiver<LogEntry>,
}

impl Stream for LogEntries {
    type Item = LogEntry;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
