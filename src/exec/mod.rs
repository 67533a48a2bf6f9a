// ABOUTME: Cross-platform process wrapper for container engine CLIs.
// ABOUTME: Resolves executable suffixes, escapes arguments, counts spawns.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::process::{Child, Command};

/// Errors from launching engine processes.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// Captured output of a finished engine command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns engine CLI processes with piped stdio.
///
/// Cheap to clone; clones share the cumulative spawn counter, which exists
/// for diagnostics and lets callers verify how many processes were launched.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    spawned: Arc<AtomicU64>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of processes launched through this executor.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Appends the platform binary suffix unless the name already carries an
    /// extension. On unix this is the identity function.
    pub fn resolve_program(name: &str) -> String {
        if std::env::consts::EXE_SUFFIX.is_empty()
            || std::path::Path::new(name).extension().is_some()
        {
            name.to_string()
        } else {
            format!("{name}{}", std::env::consts::EXE_SUFFIX)
        }
    }

    /// Renders an argument list as a single safely-quoted command string.
    /// Used for logging and debugging; actual spawns pass the vector as-is.
    pub fn shell_join(args: &[String]) -> String {
        args.iter()
            .map(|a| Self::shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Quotes an argument when it contains whitespace or shell metacharacters,
    /// escaping embedded quotes per the target shell's convention.
    pub fn shell_quote(arg: &str) -> String {
        const META: &[char] = &[
            ' ', '\t', '\n', '|', '&', ';', '<', '>', '(', ')', '$', '`', '\\', '"', '\'', '*',
            '?', '[', ']', '#', '~', '!', '{', '}',
        ];
        if !arg.is_empty() && !arg.contains(META) {
            return arg.to_string();
        }
        if cfg!(windows) {
            format!("\"{}\"", arg.replace('"', "\\\""))
        } else {
            format!("'{}'", arg.replace('\'', r"'\''"))
        }
    }

    /// Runs a command to completion, capturing its output.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        let program = Self::resolve_program(program);
        tracing::debug!("running: {} {}", program, Self::shell_join(args));
        let output = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                program: program.clone(),
                source,
            })?;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Spawns a long-lived streaming command with piped stdout/stderr.
    /// The child is killed if its handle is dropped without being reaped.
    pub fn spawn(&self, program: &str, args: &[String]) -> Result<Child, ExecError> {
        let program = Self::resolve_program(program);
        tracing::debug!("spawning: {} {}", program, Self::shell_join(args));
        let child = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.clone(),
                source,
            })?;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(child)
    }

    /// Delivers a graceful termination signal to a running child.
    ///
    /// There is no escalation if the process ignores the signal; dropping the
    /// child handle remains the terminal backstop.
    pub fn terminate(pid: u32) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!("failed to signal pid {pid}: {e}");
            }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
        }
    }
}
