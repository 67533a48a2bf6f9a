// ABOUTME: Fake container engine for integration tests.
// ABOUTME: A shell script that logs every invocation and plays back canned output.

#![allow(dead_code)]

use apex_runtime::runtime::EnginePaths;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scripted stand-in for an engine binary.
///
/// Every invocation is appended to a call log as a single `$*` line, then the
/// supplied `case "$1" in ...` body decides the response.
pub struct FakeEngine {
    dir: TempDir,
    bin: PathBuf,
}

/// Route library tracing into the test harness, honoring `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

impl FakeEngine {
    pub fn new(body: &str) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("engine.sh");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$*\" >> \"{log}\"\n{body}\n",
            log = dir.path().join("calls.log").display(),
        );
        std::fs::write(&bin, script).expect("write fake engine");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755))
                .expect("chmod fake engine");
        }
        Self { dir, bin }
    }

    pub fn path(&self) -> &Path {
        &self.bin
    }

    /// Engine paths pointing docker at this script and podman at nothing.
    pub fn engine_paths(&self) -> EnginePaths {
        EnginePaths {
            docker: Some(self.bin.clone()),
            podman: Some(self.dir.path().join("missing-podman")),
        }
    }

    /// Every invocation so far, one `$*` line each.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// A healthy engine front half: version banner plus a passing daemon probe.
pub const PROBE_OK: &str = r#"case "$1" in
  --version) echo "Docker version 24.0.7, build afdd53b4e"; exit 0 ;;
  info) exit 0 ;;
esac"#;
