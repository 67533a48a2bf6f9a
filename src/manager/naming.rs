// ABOUTME: Container name derivation and task-id extraction.
// ABOUTME: Centralizes the apex-<taskId> naming convention.

use chrono::Utc;

/// Default container name prefix.
pub const NAME_PREFIX: &str = "apex";
/// Default separator between name components.
pub const NAME_SEPARATOR: &str = "-";

/// Options for container name generation; every field has a default.
#[derive(Debug, Clone)]
pub struct NameOptions {
    /// Name prefix. Default `"apex"`.
    pub prefix: String,
    /// Component separator. Default `"-"`.
    pub separator: String,
    /// Include the sanitized task id. Default `true`.
    pub include_task_id: bool,
    /// Append a millisecond timestamp component. Default `false`.
    pub time_suffix: bool,
    /// Append a random hex component. Default `false`.
    pub random_suffix: bool,
}

impl Default for NameOptions {
    fn default() -> Self {
        Self {
            prefix: NAME_PREFIX.to_string(),
            separator: NAME_SEPARATOR.to_string(),
            include_task_id: true,
            time_suffix: false,
            random_suffix: false,
        }
    }
}

/// Derive a container name from a task id: `"<prefix>-<taskId>"` by default.
pub fn generate_name(task_id: &str, opts: &NameOptions) -> String {
    let mut name = opts.prefix.clone();
    if opts.include_task_id {
        name.push_str(&opts.separator);
        name.push_str(&sanitize_task_id(task_id));
    }
    if opts.time_suffix {
        name.push_str(&opts.separator);
        name.push_str(&Utc::now().timestamp_millis().to_string());
    }
    if opts.random_suffix {
        name.push_str(&opts.separator);
        name.push_str(&random_component());
    }
    name
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn random_component() -> String {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_err() {
        // Entropy source failure: fall back to sub-second time bits.
        buf = Utc::now().timestamp_subsec_nanos().to_le_bytes();
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// Recover the task id from a container name.
///
/// A leading path separator is stripped first. Names beginning with the
/// literal `"apex-"` prefix yield the first `-`-separated segment after it,
/// which may be empty; anything else yields `None`.
pub fn extract_task_id(container_name: &str) -> Option<String> {
    let name = container_name
        .strip_prefix('/')
        .unwrap_or(container_name);
    let rest = name.strip_prefix("apex-")?;
    Some(rest.split('-').next().unwrap_or("").to_string())
}
