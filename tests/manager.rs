// ABOUTME: Integration tests for the container lifecycle facade.
// ABOUTME: Drives a scripted engine and asserts the exact CLI lines issued.

#![cfg(unix)]

mod support;

use apex_runtime::exec::CommandExecutor;
use apex_runtime::manager::{
    BuildError, BuildRequest, BuildResult, ContainerConfig, ContainerManager, ContainerStatus,
    CreateRequest, ImageBuilder, ImageInfo, RemoveOptions, StopOptions,
};
use apex_runtime::runtime::{RuntimeDetector, RuntimeKind};
use apex_runtime::types::{ContainerId, ImageRef};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use support::FakeEngine;

const INSPECT_LINE: &str = "cafebabe1234|/apex-task-123|node:20-alpine|running|2024-05-01T10:00:00Z|2024-05-01T10:00:01Z|<no value>|0";

fn manager(engine: &FakeEngine) -> ContainerManager {
    let executor = CommandExecutor::new();
    let detector = Arc::new(
        RuntimeDetector::new(executor.clone()).with_engine_paths(engine.engine_paths()),
    );
    ContainerManager::new(executor, detector)
}

fn happy_engine() -> FakeEngine {
    FakeEngine::new(&format!(
        r#"case "$1" in
  --version) echo "Docker version 24.0.7, build afdd53b4e"; exit 0 ;;
  info) exit 0 ;;
  create) echo cafebabe1234; exit 0 ;;
  start|stop|rm) exit 0 ;;
  inspect) echo '{INSPECT_LINE}'; exit 0 ;;
  ps) echo cafebabe1234; exit 0 ;;
  stats) echo 'cafebabe1234|12.5%|512MiB / 1GiB|50.0%|1kB / 800B|1MB / 500kB|3'; exit 0 ;;
esac
exit 0"#
    ))
}

fn request() -> CreateRequest {
    let mut config = ContainerConfig::new(ImageRef::parse("node:20-alpine").expect("image"));
    config.auto_remove = true;
    CreateRequest::new(config, "task-123")
}

/// Test: create derives the apex name, issues one create line, and returns
/// the id the engine printed.
#[tokio::test]
async fn create_names_and_identifies_the_container() {
    let engine = happy_engine();
    let manager = manager(&engine);

    let result = manager.create_container(request()).await;
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(
        result.container_id.as_ref().map(|id| id.as_str()),
        Some("cafebabe1234")
    );
    assert_eq!(result.container_name.as_deref(), Some("apex-task-123"));
    let info = result.info.expect("fresh snapshot");
    assert_eq!(info.status, ContainerStatus::Running);

    let creates: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|l| l.starts_with("create "))
        .collect();
    assert_eq!(creates.len(), 1);
    assert_eq!(
        creates[0],
        "create --name apex-task-123 --rm node:20-alpine"
    );
}

/// Test: auto-start failure force-removes the created container exactly once
/// and reports the start failure with the identity intact.
#[tokio::test]
async fn failed_auto_start_cleans_up_once() {
    let engine = FakeEngine::new(
        r#"case "$1" in
  --version) echo "Docker version 24.0.7, build afdd53b4e"; exit 0 ;;
  info) exit 0 ;;
  create) echo cafebabe1234; exit 0 ;;
  start) echo boom 1>&2; exit 1 ;;
  rm) exit 0 ;;
esac
exit 0"#,
    );
    let manager = manager(&engine);

    let mut request = request();
    request.auto_start = true;
    let result = manager.create_container(request).await;

    assert!(!result.success);
    assert!(result.error.as_deref().is_some_and(|e| e.contains("boom")));
    assert_eq!(
        result.container_id.as_ref().map(|id| id.as_str()),
        Some("cafebabe1234")
    );
    assert_eq!(result.container_name.as_deref(), Some("apex-task-123"));
    assert!(!result.warnings.is_empty());

    let removals: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|l| l.starts_with("rm "))
        .collect();
    assert_eq!(removals, vec!["rm --force cafebabe1234"]);
}

/// Test: a name override bypasses name generation.
#[tokio::test]
async fn name_override_is_used_verbatim() {
    let engine = happy_engine();
    let manager = manager(&engine);

    let mut request = request();
    request.name_override = Some("custom-name".to_string());
    let result = manager.create_container(request).await;
    assert!(result.success);
    assert_eq!(result.container_name.as_deref(), Some("custom-name"));
    assert!(
        engine
            .calls()
            .iter()
            .any(|l| l.starts_with("create --name custom-name "))
    );
}

/// Test: stop passes the grace period through as whole seconds.
#[tokio::test]
async fn stop_forwards_the_grace_period() {
    let engine = happy_engine();
    let manager = manager(&engine);
    let id = ContainerId::new("cafebabe1234");

    let result = manager
        .stop_container(&id, StopOptions::default(), None)
        .await;
    assert!(result.success);
    assert!(
        engine
            .calls()
            .contains(&"stop --time 10 cafebabe1234".to_string())
    );
}

/// Test: forced removal renders the flag before the id.
#[tokio::test]
async fn remove_supports_force() {
    let engine = happy_engine();
    let manager = manager(&engine);
    let id = ContainerId::new("cafebabe1234");

    let result = manager
        .remove_container(&id, RemoveOptions { force: true }, None)
        .await;
    assert!(result.success);
    assert!(
        engine
            .calls()
            .contains(&"rm --force cafebabe1234".to_string())
    );
}

/// Test: inspection parses the templated line into a snapshot; read-only
/// queries never error.
#[tokio::test]
async fn inspection_returns_a_snapshot() {
    let engine = happy_engine();
    let manager = manager(&engine);
    let id = ContainerId::new("cafebabe1234");

    let info = manager.get_container_info(&id).await.expect("info");
    assert_eq!(info.id.as_str(), "cafebabe1234");
    assert_eq!(info.name, "apex-task-123");
    assert_eq!(info.image, "node:20-alpine");
    assert!(info.status.is_running());
    assert!(info.created_at.is_some());
    assert_eq!(info.finished_at, None);
}

/// Test: a missing container degrades inspection to None.
#[tokio::test]
async fn missing_container_inspects_to_none() {
    let engine = FakeEngine::new(
        r#"case "$1" in
  --version) echo "Docker version 24.0.7, build afdd53b4e"; exit 0 ;;
  info) exit 0 ;;
  inspect) echo "Error: no such container" 1>&2; exit 1 ;;
esac
exit 0"#,
    );
    let manager = manager(&engine);
    let id = ContainerId::new("deadbeef");
    assert!(manager.get_container_info(&id).await.is_none());
}

/// Test: stats mixes binary and decimal byte units per suffix.
#[tokio::test]
async fn stats_parse_mixed_units() {
    let engine = happy_engine();
    let manager = manager(&engine);
    let id = ContainerId::new("cafebabe1234");

    let stats = manager.get_stats(&id, None).await.expect("stats");
    assert_eq!(stats.cpu_percent, 12.5);
    assert_eq!(stats.memory_usage, 536_870_912);
    assert_eq!(stats.memory_limit, 1_073_741_824);
    assert_eq!(stats.memory_percent, 50.0);
    assert_eq!(stats.network_rx_bytes, 1000);
    assert_eq!(stats.network_tx_bytes, 800);
    assert_eq!(stats.block_read_bytes, 1_000_000);
    assert_eq!(stats.block_write_bytes, 500_000);
    assert_eq!(stats.pids, 3);
}

/// Test: listing filters on the apex name prefix and inspects each id.
#[tokio::test]
async fn listing_returns_managed_containers() {
    let engine = happy_engine();
    let manager = manager(&engine);

    let containers = manager.list_apex_containers().await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "apex-task-123");
    assert!(
        engine
            .calls()
            .iter()
            .any(|l| l.starts_with("ps -a --filter name=apex-"))
    );
}

/// Test: with no usable engine, mutations fail as values and queries degrade.
#[tokio::test]
async fn no_engine_degrades_without_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = apex_runtime::runtime::EnginePaths {
        docker: Some(dir.path().join("missing-docker")),
        podman: Some(dir.path().join("missing-podman")),
    };
    let executor = CommandExecutor::new();
    let detector = Arc::new(RuntimeDetector::new(executor.clone()).with_engine_paths(paths));
    let manager = ContainerManager::new(executor, detector);

    let result = manager.create_container(request()).await;
    assert!(!result.success);
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("no usable container runtime"))
    );

    let id = ContainerId::new("cafebabe1234");
    assert!(manager.get_container_info(&id).await.is_none());
    assert!(manager.get_stats(&id, None).await.is_none());
    assert!(manager.list_apex_containers().await.is_empty());
}

/// Test: an explicit engine choice overrides auto-detection for one call.
#[tokio::test]
async fn explicit_runtime_overrides_detection() {
    let docker = happy_engine();
    let podman = happy_engine();
    let paths = apex_runtime::runtime::EnginePaths {
        docker: Some(docker.path().to_path_buf()),
        podman: Some(podman.path().to_path_buf()),
    };
    let executor = CommandExecutor::new();
    let detector = Arc::new(RuntimeDetector::new(executor.clone()).with_engine_paths(paths));
    let manager = ContainerManager::new(executor, detector);
    let id = ContainerId::new("cafebabe1234");

    let result = manager
        .stop_container(&id, StopOptions::default(), Some(RuntimeKind::Podman))
        .await;
    assert!(result.success);
    assert!(
        podman
            .calls()
            .contains(&"stop --time 10 cafebabe1234".to_string())
    );
    assert!(!docker.calls().iter().any(|l| l.starts_with("stop ")));

    let stats = manager
        .get_stats(&id, Some(RuntimeKind::Podman))
        .await
        .expect("stats");
    assert_eq!(stats.pids, 3);
    assert!(!docker.calls().iter().any(|l| l.starts_with("stats ")));
}

struct StubBuilder {
    succeed: bool,
    init_count: AtomicUsize,
    requests: StdMutex<Vec<BuildRequest>>,
}

impl StubBuilder {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            init_count: AtomicUsize::new(0),
            requests: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ImageBuilder for StubBuilder {
    async fn initialize(&self) -> Result<(), BuildError> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn build_image(&self, request: BuildRequest) -> BuildResult {
        let tag = request.image_tag.clone();
        self.requests.lock().expect("requests lock").push(request);
        if self.succeed {
            BuildResult {
                success: true,
                image: Some(ImageInfo {
                    tag,
                    image_id: None,
                }),
                error: None,
                build_output: "ok".to_string(),
                build_duration: Duration::from_millis(5),
                rebuilt: true,
            }
        } else {
            BuildResult {
                success: false,
                image: None,
                error: Some("no base image".to_string()),
                build_output: String::new(),
                build_duration: Duration::from_millis(5),
                rebuilt: false,
            }
        }
    }
}

/// Test: a successful Dockerfile build substitutes the built tag for the
/// configured image, and the builder is initialized exactly once.
#[tokio::test]
async fn successful_build_substitutes_the_built_tag() {
    let engine = happy_engine();
    let builder = StubBuilder::new(true);
    let manager = manager(&engine).with_image_builder(builder.clone());

    let context = tempfile::tempdir().expect("tempdir");
    let dockerfile = context.path().join("Dockerfile");
    std::fs::write(&dockerfile, "FROM node:20-alpine\n").expect("write dockerfile");

    let mut request = request();
    request.config.dockerfile = Some(dockerfile.clone());

    let result = manager.create_container(request.clone()).await;
    assert!(result.success, "error: {:?}", result.error);
    assert!(
        engine
            .calls()
            .contains(&"create --name apex-task-123 --rm node:apex-build".to_string())
    );

    let requests = builder.requests.lock().expect("requests lock");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].dockerfile_path, dockerfile);
    assert_eq!(requests[0].build_context.as_path(), context.path());
    assert_eq!(requests[0].image_tag, "node:apex-build");
    drop(requests);

    manager.create_container(request).await;
    assert_eq!(builder.init_count.load(Ordering::SeqCst), 1);
}

/// Test: a failed build falls back to the configured image with a warning.
#[tokio::test]
async fn failed_build_falls_back_to_the_configured_image() {
    let engine = happy_engine();
    let builder = StubBuilder::new(false);
    let manager = manager(&engine).with_image_builder(builder);

    let context = tempfile::tempdir().expect("tempdir");
    let dockerfile = context.path().join("Dockerfile");
    std::fs::write(&dockerfile, "FROM nothing\n").expect("write dockerfile");

    let mut request = request();
    request.config.dockerfile = Some(dockerfile);

    let result = manager.create_container(request).await;
    assert!(result.success, "error: {:?}", result.error);
    assert!(
        result
            .warnings
            .iter()
            .any(|w| w.contains("image build failed") && w.contains("no base image"))
    );
    assert!(
        engine
            .calls()
            .contains(&"create --name apex-task-123 --rm node:20-alpine".to_string())
    );
}

/// Test: a missing Dockerfile skips the builder entirely.
#[tokio::test]
async fn missing_dockerfile_skips_the_build() {
    let engine = happy_engine();
    let builder = StubBuilder::new(true);
    let manager = manager(&engine).with_image_builder(builder.clone());

    let mut request = request();
    request.config.dockerfile = Some(std::path::PathBuf::from("/nonexistent/Dockerfile"));

    let result = manager.create_container(request).await;
    assert!(result.success);
    assert!(result.warnings.iter().any(|w| w.contains("not found")));
    assert!(builder.requests.lock().expect("requests lock").is_empty());
    assert!(
        engine
            .calls()
            .contains(&"create --name apex-task-123 --rm node:20-alpine".to_string())
    );
}
