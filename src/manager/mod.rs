// ABOUTME: Container lifecycle facade over the detected engine CLI.
// ABOUTME: Create/start/stop/remove/inspect plus event and log streaming.

use crate::exec::CommandExecutor;
use crate::runtime::{ContainerStats, RuntimeDetector, RuntimeKind, parse_stats_row};
use crate::types::ContainerId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, broadcast};

pub mod builder;
pub mod config;
pub mod event;
pub mod events;
pub mod framing;
pub mod inspect;
pub mod logs;
pub mod naming;

pub use builder::{BuildError, BuildRequest, BuildResult, ImageBuilder, ImageInfo};
pub use config::{
    ContainerConfig, CreateRequest, OperationResult, RemoveOptions, ResourceLimits,
    SecuritySettings, StopOptions,
};
pub use event::{ContainerDiedEvent, ContainerEvent, LifecycleNotification};
pub use events::{EventsError, EventsMonitorOptions, RuntimeEvent};
pub use framing::LineFramer;
pub use inspect::{ContainerInfo, ContainerStatus, parse_inspect_line};
pub use logs::{
    LogEntries, LogEntry, LogError, LogEvent, LogOptions, LogSource, LogStream, Tail,
};
pub use naming::{NAME_PREFIX, NameOptions, extract_task_id, generate_name, sanitize_task_id};

use crate::error::{EventsSnafu, LogsSnafu, RuntimeError, UnavailableSnafu};
use events::EventsMonitor;
use inspect::Inspector;
use snafu::{OptionExt, ResultExt};

/// Capacity of the lifecycle event channel; slow subscribers observe a gap.
const EVENT_CAPACITY: usize = 256;

/// Budget for a one-shot stats query before it is abandoned.
const STATS_TIMEOUT: Duration = Duration::from_secs(10);

/// Tag suffix for images built from a configured Dockerfile.
const BUILD_TAG: &str = "apex-build";

/// The container lifecycle engine.
///
/// Wraps whichever engine [`RuntimeDetector`] selects and exposes typed
/// operations over its CLI. Mutating operations report failure through
/// [`OperationResult`] rather than errors; read-only queries degrade to
/// `None` or empty. Only stream setup returns [`RuntimeError`].
pub struct ContainerManager {
    executor: CommandExecutor,
    detector: Arc<RuntimeDetector>,
    builder: Option<Arc<dyn ImageBuilder>>,
    builder_init: OnceCell<()>,
    preferred_runtime: Option<RuntimeKind>,
    events_tx: broadcast::Sender<ContainerEvent>,
    monitor: Mutex<Option<EventsMonitor>>,
}

impl ContainerManager {
    pub fn new(executor: CommandExecutor, detector: Arc<RuntimeDetector>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            executor,
            detector,
            builder: None,
            builder_init: OnceCell::new(),
            preferred_runtime: None,
            events_tx,
            monitor: Mutex::new(None),
        }
    }

    /// Wire in the image-build subsystem used by Dockerfile-based creates.
    pub fn with_image_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Prefer this engine whenever it is available.
    pub fn with_preferred_runtime(mut self, kind: RuntimeKind) -> Self {
        self.preferred_runtime = Some(kind);
        self
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Subscribe to lifecycle events published by this manager.
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events_tx.subscribe()
    }

    /// Resolve the engine for one operation: an explicit choice wins over the
    /// configured preference, and either falls back to the best available.
    async fn resolve_runtime(&self, explicit: Option<RuntimeKind>) -> Option<RuntimeKind> {
        self.detector
            .select_best(explicit.or(self.preferred_runtime))
            .await
    }

    fn inspector(&self, program: &str) -> Inspector {
        Inspector::new(self.executor.clone(), program.to_string())
    }

    fn emit(&self, event: ContainerEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Create a container, optionally building its image and starting it.
    ///
    /// When `auto_start` is set and the start fails, the created container is
    /// force-removed once so no half-started container is left behind, and
    /// the result reports the start failure with the identity filled in.
    pub async fn create_container(&self, request: CreateRequest) -> OperationResult {
        let Some(kind) = self.resolve_runtime(None).await else {
            return OperationResult::failed("no usable container runtime available");
        };
        let program = self.detector.program(kind);

        let mut warnings = Vec::new();
        let image = self.resolve_image(&request.config, &mut warnings).await;

        let name = request
            .name_override
            .clone()
            .unwrap_or_else(|| generate_name(&request.task_id, &NameOptions::default()));

        let args = build_create_args(&name, &request.config, &image);
        let out = match self.executor.run(&program, &args).await {
            Ok(out) => out,
            Err(e) => {
                let mut result = OperationResult::failed(format!("create failed: {e}"));
                result.container_name = Some(name);
                result.warnings = warnings;
                return result;
            }
        };
        if !out.success() {
            let mut result = OperationResult::failed(format!(
                "create failed: {}",
                out.stderr.trim()
            ));
            result.container_name = Some(name);
            result.warnings = warnings;
            return result;
        }

        // The engine prints the new container id as its final line.
        let id = out
            .stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
        let container_id = ContainerId::new(id);
        tracing::info!("created container {} ({name})", container_id.short());

        self.emit(ContainerEvent::Created {
            container_id: container_id.clone(),
            name: name.clone(),
            task_id: extract_task_id(&name),
        });
        self.emit(ContainerEvent::Lifecycle(LifecycleNotification::now(
            "created",
            container_id.clone(),
        )));

        if request.auto_start {
            let start_args = vec!["start".to_string(), container_id.as_str().to_string()];
            let start_failure = match self.executor.run(&program, &start_args).await {
                Ok(out) if out.success() => None,
                Ok(out) => Some(out.stderr.trim().to_string()),
                Err(e) => Some(e.to_string()),
            };
            if let Some(failure) = start_failure {
                // One compensating removal attempt, never retried.
                let rm_args = vec![
                    "rm".to_string(),
                    "--force".to_string(),
                    container_id.as_str().to_string(),
                ];
                match self.executor.run(&program, &rm_args).await {
                    Ok(out) if out.success() => {
                        warnings.push(format!(
                            "removed container {} after failed start",
                            container_id.short()
                        ));
                    }
                    Ok(out) => warnings.push(format!(
                        "cleanup of {} after failed start also failed: {}",
                        container_id.short(),
                        out.stderr.trim()
                    )),
                    Err(e) => warnings.push(format!(
                        "cleanup of {} after failed start also failed: {e}",
                        container_id.short()
                    )),
                }
                return OperationResult {
                    success: false,
                    container_id: Some(container_id),
                    container_name: Some(name),
                    info: None,
                    error: Some(format!("start failed: {failure}")),
                    warnings,
                };
            }
            self.emit(ContainerEvent::Started {
                container_id: container_id.clone(),
            });
            self.emit(ContainerEvent::Lifecycle(LifecycleNotification::now(
                "started",
                container_id.clone(),
            )));
        }

        let info = self.fresh_info(&program, &container_id).await;
        OperationResult {
            success: true,
            container_id: Some(container_id),
            container_name: Some(name),
            info,
            error: None,
            warnings,
        }
    }

    /// Determine the image to run: the configured reference, or the tag
    /// produced by a Dockerfile build when one is configured and succeeds.
    /// Build failure is non-fatal and falls back to the configured image.
    async fn resolve_image(&self, config: &ContainerConfig, warnings: &mut Vec<String>) -> String {
        let Some(dockerfile) = &config.dockerfile else {
            return config.image.to_string();
        };
        let Some(builder) = &self.builder else {
            warnings.push("dockerfile configured but no image builder is wired in".to_string());
            return config.image.to_string();
        };
        if !matches!(tokio::fs::try_exists(dockerfile).await, Ok(true)) {
            warnings.push(format!(
                "dockerfile {} not found, using configured image",
                dockerfile.display()
            ));
            return config.image.to_string();
        }

        // One-time builder setup, retried on the next create if it failed.
        if let Err(e) = self
            .builder_init
            .get_or_try_init(|| builder.initialize())
            .await
        {
            tracing::warn!("image builder initialization failed: {e}");
            warnings.push(format!(
                "image builder initialization failed ({e}), using configured image"
            ));
            return config.image.to_string();
        }

        let build_context = config
            .build_context
            .clone()
            .or_else(|| dockerfile.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        let image_tag = config
            .image_tag
            .clone()
            .unwrap_or_else(|| config.image.tagged(BUILD_TAG).to_string());

        let result = builder
            .build_image(BuildRequest {
                dockerfile_path: dockerfile.clone(),
                build_context,
                image_tag,
            })
            .await;

        if result.success
            && let Some(image) = result.image
        {
            tracing::info!(
                "built image {} in {:?} (rebuilt: {})",
                image.tag,
                result.build_duration,
                result.rebuilt
            );
            return image.tag;
        }

        let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
        tracing::warn!("image build failed, falling back to configured image: {reason}");
        warnings.push(format!("image build failed ({reason}), using configured image"));
        config.image.to_string()
    }

    /// Start a created or stopped container, optionally on an explicit engine.
    pub async fn start_container(
        &self,
        id: &ContainerId,
        runtime: Option<RuntimeKind>,
    ) -> OperationResult {
        let args = vec!["start".to_string(), id.as_str().to_string()];
        let result = self.run_mutation(id, &args, "start", runtime).await;
        if result.success {
            self.emit(ContainerEvent::Started {
                container_id: id.clone(),
            });
            self.emit(ContainerEvent::Lifecycle(LifecycleNotification::now(
                "started",
                id.clone(),
            )));
        }
        result
    }

    /// Stop a container, allowing it the configured grace period.
    pub async fn stop_container(
        &self,
        id: &ContainerId,
        options: StopOptions,
        runtime: Option<RuntimeKind>,
    ) -> OperationResult {
        let args = vec![
            "stop".to_string(),
            "--time".to_string(),
            options.timeout.as_secs().to_string(),
            id.as_str().to_string(),
        ];
        let result = self.run_mutation(id, &args, "stop", runtime).await;
        if result.success {
            self.emit(ContainerEvent::Lifecycle(LifecycleNotification::now(
                "stopped",
                id.clone(),
            )));
        }
        result
    }

    /// Remove a container.
    pub async fn remove_container(
        &self,
        id: &ContainerId,
        options: RemoveOptions,
        runtime: Option<RuntimeKind>,
    ) -> OperationResult {
        let mut args = vec!["rm".to_string()];
        if options.force {
            args.push("--force".to_string());
        }
        args.push(id.as_str().to_string());

        let Some(kind) = self.resolve_runtime(runtime).await else {
            return OperationResult::failed("no usable container runtime available");
        };
        let program = self.detector.program(kind);
        let mut result = match self.executor.run(&program, &args).await {
            Ok(out) if out.success() => OperationResult::succeeded(id.clone()),
            Ok(out) => OperationResult::failed(format!("remove failed: {}", out.stderr.trim())),
            Err(e) => OperationResult::failed(format!("remove failed: {e}")),
        };
        if result.success {
            self.emit(ContainerEvent::Lifecycle(LifecycleNotification::now(
                "removed",
                id.clone(),
            )));
        } else {
            result.container_id = Some(id.clone());
        }
        result
    }

    /// Shared start/stop plumbing: run the command, then re-query the
    /// container for a fresh snapshot on success.
    async fn run_mutation(
        &self,
        id: &ContainerId,
        args: &[String],
        operation: &str,
        runtime: Option<RuntimeKind>,
    ) -> OperationResult {
        let Some(kind) = self.resolve_runtime(runtime).await else {
            return OperationResult::failed("no usable container runtime available");
        };
        let program = self.detector.program(kind);
        match self.executor.run(&program, args).await {
            Ok(out) if out.success() => {
                let mut result = OperationResult::succeeded(id.clone());
                result.info = self.fresh_info(&program, id).await;
                result
            }
            Ok(out) => {
                let mut result = OperationResult::failed(format!(
                    "{operation} failed: {}",
                    out.stderr.trim()
                ));
                result.container_id = Some(id.clone());
                result
            }
            Err(e) => {
                let mut result = OperationResult::failed(format!("{operation} failed: {e}"));
                result.container_id = Some(id.clone());
                result
            }
        }
    }

    async fn fresh_info(&self, program: &str, id: &ContainerId) -> Option<ContainerInfo> {
        match self.inspector(program).container_info(id.as_str()).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("container info lookup failed for {}: {e}", id.short());
                None
            }
        }
    }

    /// A fresh snapshot of one container. `None` when no runtime is usable,
    /// the container does not exist, or inspection fails.
    pub async fn get_container_info(&self, id: &ContainerId) -> Option<ContainerInfo> {
        let kind = self.resolve_runtime(None).await?;
        let program = self.detector.program(kind);
        self.fresh_info(&program, id).await
    }

    /// One-shot resource telemetry for a running container.
    pub async fn get_stats(
        &self,
        id: &ContainerId,
        runtime: Option<RuntimeKind>,
    ) -> Option<ContainerStats> {
        let kind = self.resolve_runtime(runtime).await?;
        let program = self.detector.program(kind);
        let args = vec![
            "stats".to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            "{{.ID}}|{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}|{{.PIDs}}"
                .to_string(),
            id.as_str().to_string(),
        ];
        let out = match tokio::time::timeout(STATS_TIMEOUT, self.executor.run(&program, &args))
            .await
        {
            Ok(Ok(out)) if out.success() => out,
            Ok(Ok(out)) => {
                tracing::debug!("stats query for {} failed: {}", id.short(), out.stderr.trim());
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!("stats query for {} failed: {e}", id.short());
                return None;
            }
            Err(_) => {
                tracing::warn!("stats query for {} timed out", id.short());
                return None;
            }
        };
        out.stdout
            .lines()
            .filter(|line| !is_stats_header(line))
            .find_map(parse_stats_row)
    }

    /// All containers created under the `apex-` naming convention, running or
    /// not. Degrades to an empty list on any failure.
    pub async fn list_apex_containers(&self) -> Vec<ContainerInfo> {
        let Some(kind) = self.resolve_runtime(None).await else {
            return Vec::new();
        };
        let program = self.detector.program(kind);
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("name={NAME_PREFIX}-"),
            "--format".to_string(),
            "{{.ID}}".to_string(),
        ];
        let out = match self.executor.run(&program, &args).await {
            Ok(out) if out.success() => out,
            Ok(out) => {
                tracing::debug!("container listing failed: {}", out.stderr.trim());
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!("container listing failed: {e}");
                return Vec::new();
            }
        };

        let inspector = self.inspector(&program);
        let mut containers = Vec::new();
        for id in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match inspector.container_info(id).await {
                Ok(Some(info)) => containers.push(info),
                Ok(None) => {}
                Err(e) => tracing::warn!("container info lookup failed for {id}: {e}"),
            }
        }
        containers
    }

    /// Start runtime-wide lifecycle monitoring. A no-op when already running.
    pub async fn start_events_monitoring(
        &self,
        options: EventsMonitorOptions,
    ) -> Result<(), RuntimeError> {
        let mut guard = self.monitor.lock().await;
        if let Some(monitor) = guard.as_ref()
            && monitor.is_active().await
        {
            return Ok(());
        }

        let kind = self.resolve_runtime(None).await.context(UnavailableSnafu)?;
        let program = self.detector.program(kind);
        let monitor = EventsMonitor::new(
            self.executor.clone(),
            program.clone(),
            self.inspector(&program),
            options,
            self.events_tx.clone(),
        );
        monitor.start().await.context(EventsSnafu)?;
        *guard = Some(monitor);
        Ok(())
    }

    /// Stop lifecycle monitoring. Idempotent.
    pub async fn stop_events_monitoring(&self) {
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
    }

    pub async fn is_monitoring_events(&self) -> bool {
        match self.monitor.lock().await.as_ref() {
            Some(monitor) => monitor.is_active().await,
            None => false,
        }
    }

    /// Open a live log tail for a container.
    pub async fn log_stream(
        &self,
        id: &ContainerId,
        options: LogOptions,
        runtime: Option<RuntimeKind>,
    ) -> Result<LogStream, RuntimeError> {
        let kind = self
            .resolve_runtime(runtime)
            .await
            .context(UnavailableSnafu)?;
        let program = self.detector.program(kind);
        LogStream::open(&self.executor, &program, id, options).context(LogsSnafu)
    }
}

/// Render the create arguments for a configuration, in a stable order.
pub fn build_create_args(name: &str, config: &ContainerConfig, image: &str) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), name.to_string()];

    for (key, value) in &config.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    for (host, container) in &config.volumes {
        args.push("-v".to_string());
        args.push(format!("{host}:{container}"));
    }

    let limits = &config.resources;
    if let Some(memory) = &limits.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    if let Some(reservation) = &limits.memory_reservation {
        args.push("--memory-reservation".to_string());
        args.push(reservation.clone());
    }
    if let Some(swap) = &limits.memory_swap {
        args.push("--memory-swap".to_string());
        args.push(swap.clone());
    }
    if let Some(shares) = limits.cpu_shares {
        args.push("--cpu-shares".to_string());
        args.push(shares.to_string());
    }
    if let Some(cpus) = limits.cpu_quota {
        args.push("--cpus".to_string());
        args.push(cpus.to_string());
    }
    if let Some(pids) = limits.pids_limit {
        args.push("--pids-limit".to_string());
        args.push(pids.to_string());
    }

    let security = &config.security;
    if security.privileged {
        args.push("--privileged".to_string());
    }
    for cap in &security.cap_add {
        args.push("--cap-add".to_string());
        args.push(cap.clone());
    }
    for cap in &security.cap_drop {
        args.push("--cap-drop".to_string());
        args.push(cap.clone());
    }
    for opt in &security.security_opt {
        args.push("--security-opt".to_string());
        args.push(opt.clone());
    }

    if let Some(network) = &config.network_mode {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    if let Some(workdir) = &config.working_dir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }
    if config.auto_remove {
        args.push("--rm".to_string());
    }
    if let Some(entrypoint) = &config.entrypoint {
        args.push("--entrypoint".to_string());
        args.push(entrypoint.clone());
    }

    args.push(image.to_string());
    args.extend(config.command.iter().cloned());
    args
}

/// Header lines some engine versions emit even with a custom format.
fn is_stats_header(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("CONTAINER")
        || line
            .split('|')
            .nth(1)
            .is_some_and(|field| field.trim() == "CPU %")
}
