// ABOUTME: Runtime detection with TTL caching and compatibility validation.
// ABOUTME: Probes each engine with a version check then a daemon health check.

use super::types::{EnginePaths, RuntimeInfo, RuntimeKind, RuntimeVersion};
use crate::exec::CommandExecutor;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Version window a caller requires from an engine.
#[derive(Debug, Clone, Default)]
pub struct VersionRequirements {
    pub min_version: Option<String>,
    pub max_version: Option<String>,
}

/// Outcome of validating an engine against a version window.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub version_compatible: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

struct CachedDetection {
    at: Instant,
    results: Vec<RuntimeInfo>,
}

/// Probes Docker and Podman for presence and health.
///
/// An explicit instance holding its own cache and TTL; construct one and
/// hand it to the [`ContainerManager`](crate::ContainerManager) so tests can
/// use isolated instances.
pub struct RuntimeDetector {
    executor: CommandExecutor,
    paths: EnginePaths,
    ttl: Duration,
    cache: Mutex<Option<CachedDetection>>,
}

impl RuntimeDetector {
    pub fn new(executor: CommandExecutor) -> Self {
        Self::with_ttl(executor, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(executor: CommandExecutor, ttl: Duration) -> Self {
        Self {
            executor,
            paths: EnginePaths::default(),
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Use explicit engine binary locations instead of PATH lookup.
    pub fn with_engine_paths(mut self, paths: EnginePaths) -> Self {
        self.paths = paths;
        self
    }

    /// The program to invoke for an engine, honoring configured overrides.
    pub fn program(&self, kind: RuntimeKind) -> String {
        self.paths.program(kind)
    }

    /// Detect both engines, serving cached results within the TTL window.
    pub async fn detect(&self) -> Vec<RuntimeInfo> {
        if let Some(cached) = self.cache.lock().as_ref()
            && cached.at.elapsed() < self.ttl
        {
            return cached.results.clone();
        }

        let mut results = Vec::with_capacity(RuntimeKind::PRIORITY.len());
        for kind in RuntimeKind::PRIORITY {
            results.push(self.probe(kind).await);
        }
        // Replaced wholesale; readers never observe a partial update.
        *self.cache.lock() = Some(CachedDetection {
            at: Instant::now(),
            results: results.clone(),
        });
        results
    }

    /// Drop cached results so the next `detect` re-probes the engines.
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    /// Probe a single engine: version first, then daemon reachability.
    pub async fn probe(&self, kind: RuntimeKind) -> RuntimeInfo {
        let program = self.program(kind);

        let version_out = match self.executor.run(&program, &["--version".to_string()]).await {
            Ok(out) => out,
            Err(e) => {
                return RuntimeInfo {
                    kind,
                    available: false,
                    version: None,
                    error: Some(format!("{kind} not found: {e}")),
                };
            }
        };
        if !version_out.success() {
            return RuntimeInfo {
                kind,
                available: false,
                version: None,
                error: Some(format!(
                    "{kind} version probe failed: {}",
                    version_out.stderr.trim()
                )),
            };
        }
        let version = parse_version(kind, &version_out.stdout);

        match self.executor.run(&program, &["info".to_string()]).await {
            Ok(info) if info.success() => RuntimeInfo {
                kind,
                available: true,
                version: Some(version),
                error: None,
            },
            Ok(info) => RuntimeInfo {
                kind,
                available: false,
                version: Some(version),
                error: Some(format!(
                    "{kind} is installed but not functional: {}",
                    info.stderr.trim()
                )),
            },
            Err(e) => RuntimeInfo {
                kind,
                available: false,
                version: Some(version),
                error: Some(format!("{kind} is installed but not functional: {e}")),
            },
        }
    }

    /// Pick a usable engine: the preferred one if available, else the first
    /// available engine in priority order.
    pub async fn select_best(&self, preferred: Option<RuntimeKind>) -> Option<RuntimeKind> {
        let results = self.detect().await;
        let available = |kind: RuntimeKind| results.iter().any(|r| r.kind == kind && r.available);

        if let Some(preferred) = preferred
            && available(preferred)
        {
            return Some(preferred);
        }
        RuntimeKind::PRIORITY.into_iter().find(|k| available(*k))
    }

    /// Check an engine against a required version window.
    pub async fn validate_compatibility(
        &self,
        kind: Option<RuntimeKind>,
        requirements: &VersionRequirements,
    ) -> CompatibilityReport {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let Some(kind) = kind else {
            issues.push("no container runtime selected".to_string());
            recommendations
                .push("install Docker or Podman and ensure its daemon is running".to_string());
            return CompatibilityReport {
                compatible: false,
                version_compatible: false,
                issues,
                recommendations,
            };
        };

        let results = self.detect().await;
        let info = results.iter().find(|r| r.kind == kind);
        let Some(info) = info.filter(|i| i.available) else {
            issues.push(format!("{kind} is not available"));
            recommendations.push(format!("install {kind} or start its daemon"));
            return CompatibilityReport {
                compatible: false,
                version_compatible: false,
                issues,
                recommendations,
            };
        };

        let version = info
            .version
            .as_ref()
            .map_or("unknown", |v| v.version.as_str());
        let mut version_compatible = true;

        if let Some(min) = &requirements.min_version
            && compare_versions(version, min) == Ordering::Less
        {
            version_compatible = false;
            issues.push(format!(
                "{kind} version {version} is below the minimum supported {min}"
            ));
            recommendations.push(format!("upgrade {kind} to {min} or newer"));
        }
        if let Some(max) = &requirements.max_version
            && compare_versions(version, max) == Ordering::Greater
        {
            version_compatible = false;
            issues.push(format!(
                "{kind} version {version} is above the maximum supported {max}"
            ));
            recommendations.push(format!(
                "downgrade {kind} to {max} or older, or update this tool"
            ));
        }

        CompatibilityReport {
            compatible: version_compatible,
            version_compatible,
            issues,
            recommendations,
        }
    }
}

/// Extract version information from a version-probe line.
///
/// Tries the engine-specific banner first, then a generic numeric token,
/// defaulting to "unknown".
fn parse_version(kind: RuntimeKind, raw: &str) -> RuntimeVersion {
    let line = raw.lines().next().unwrap_or("").trim();

    let version = match kind {
        RuntimeKind::Docker => line
            .strip_prefix("Docker version ")
            .and_then(|rest| rest.split([',', ' ']).next())
            .map(str::to_string),
        RuntimeKind::Podman => line
            .strip_prefix("podman version ")
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_string),
    }
    .or_else(|| generic_version(line))
    .unwrap_or_else(|| "unknown".to_string());

    let build_info = line
        .split_once("build ")
        .map(|(_, build)| build.trim().to_string())
        .filter(|b| !b.is_empty());

    RuntimeVersion {
        version,
        build_info,
        full_version: line.to_string(),
    }
}

/// First dotted numeric token in a line, e.g. "4.9.3" out of "foo 4.9.3-dev".
fn generic_version(line: &str) -> Option<String> {
    line.split(|c: char| !c.is_ascii_digit() && c != '.')
        .find(|tok| {
            tok.contains('.') && tok.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
        .map(|tok| tok.trim_matches('.').to_string())
        .filter(|tok| !tok.is_empty())
}

/// Compare two dotted version strings numerically, segment by segment.
/// Missing segments count as zero; non-numeric trailers are ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn segments(s: &str) -> Vec<u64> {
        s.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    }

    let (a, b) = (segments(a), segments(b));
    for i in 0..a.len().max(b.len()) {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}
