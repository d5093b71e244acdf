// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The agent's connection lifecycle: register, stream telemetry, and
//! run the per-task state machine
//! `idle → cloning → building → running → reporting → idle`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_orchestrator_core::agent::{ContainerDriver, RepoDriver, ResourceLimits};
use fleet_orchestrator_core::protocol::{ServerMessage, WorkerMessage};
use fleet_orchestrator_core::types::{DeploymentId, Load, Metrics, ReplicaStatus, WorkerId, WorkerStatus};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

const TELEMETRY_INTERVAL: Duration = Duration::from_secs(15);
const BUILD_MAX_ATTEMPTS: u32 = 3;
const BUILD_RETRY_DELAY: Duration = Duration::from_secs(5);
const STOP_GRACE: Duration = Duration::from_secs(10);
const BASE_PORT: u16 = 8000;

/// Default build descriptor materialized when a cloned repo has neither,
/// per step 3 of the deploy state machine: a bare Python/pip image that
/// installs whatever `requirements.txt` lists and runs `app.py`.
const DEFAULT_DOCKERFILE: &str = "FROM python:3.12-slim\nWORKDIR /app\nCOPY . .\nRUN pip install --no-cache-dir -r requirements.txt\nCMD [\"python\", \"app.py\"]\n";

/// Shared bookkeeping of this agent's currently running container
/// names, used only to average their live CPU/memory into telemetry.
type ActiveContainers = Arc<Mutex<HashSet<String>>>;

/// Per-task lifecycle; logged at each transition rather than tracked in
/// a shared table, since the worker agent processes one task's worth of
/// work per `tokio::spawn` and no cross-task coordination is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Cloning,
    Building,
    Running,
    ReportingActive,
    ReportingFailed,
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stable machine identity sent on `registerWorker`.
    pub hostname: String,
    /// Orchestrator URL, e.g. `http://localhost:3000`.
    pub main_server_url: String,
    /// Worker-side working root for deployment directories.
    pub deployment_path: String,
}

/// Drives one persistent connection to the orchestrator.
pub struct Agent {
    config: AgentConfig,
    repo_driver: Arc<dyn RepoDriver>,
    container_driver: Arc<dyn ContainerDriver>,
    active_containers: ActiveContainers,
}

impl Agent {
    /// Build an agent with the given shell-backed drivers.
    pub fn new(config: AgentConfig, repo_driver: Arc<dyn RepoDriver>, container_driver: Arc<dyn ContainerDriver>) -> Self {
        Self {
            config,
            repo_driver,
            container_driver,
            active_containers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn ws_url(&self) -> String {
        self.config
            .main_server_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1)
            + "/ws"
    }

    /// Connect, register, and run until the connection drops or the
    /// process receives a shutdown signal. Callers own the reconnect
    /// loop; this method returns once per connection attempt.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let url = self.ws_url();
        info!(%url, "connecting to orchestrator");
        let (stream, _response) = tokio_tungstenite::connect_async(&url).await?;
        let (mut sink, mut source) = stream.split();

        let register = WorkerMessage::RegisterWorker {
            hostname: self.config.hostname.clone(),
            start_time: Utc::now(),
            current_user: whoami_current_user(),
        };
        sink.send(Message::Text(serde_json::to_string(&register)?)).await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WorkerMessage>();

        let mut worker_id: Option<WorkerId> = None;
        let assigned_id = Arc::new(AtomicU64::new(0));
        let telemetry_tx = tx.clone();
        let telemetry_handle = tokio::spawn(telemetry_loop(
            telemetry_tx,
            assigned_id.clone(),
            self.container_driver.clone(),
            self.active_containers.clone(),
        ));

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            if sink.send(Message::Text(serde_json::to_string(&message)?)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(ServerMessage::WorkerRegistered { id }) => {
                                    info!(worker_id = %id, "registered");
                                    worker_id = Some(id);
                                    assigned_id.store(id.0, Ordering::SeqCst);
                                }
                                Ok(ServerMessage::DeployRepository { deployment_dir, repo_url, replica_id, deployment_id, .. }) => {
                                    let agent_tx = tx.clone();
                                    let current_worker_id = worker_id.unwrap_or(WorkerId(0));
                                    let repo_driver = self.repo_driver.clone();
                                    let container_driver = self.container_driver.clone();
                                    let deployment_path = deployment_dir.clone();
                                    let active_containers = self.active_containers.clone();
                                    tokio::spawn(async move {
                                        run_deploy_task(
                                            repo_driver,
                                            container_driver,
                                            current_worker_id,
                                            deployment_id,
                                            replica_id,
                                            repo_url,
                                            deployment_path,
                                            agent_tx,
                                            active_containers,
                                        )
                                        .await;
                                    });
                                }
                                Ok(ServerMessage::RemoveReplica { deployment_id, replica_id }) => {
                                    let agent_tx = tx.clone();
                                    let current_worker_id = worker_id.unwrap_or(WorkerId(0));
                                    let container_driver = self.container_driver.clone();
                                    let active_containers = self.active_containers.clone();
                                    tokio::spawn(async move {
                                        run_remove_task(
                                            container_driver,
                                            current_worker_id,
                                            deployment_id,
                                            replica_id,
                                            agent_tx,
                                            active_containers,
                                        )
                                        .await;
                                    });
                                }
                                Ok(ServerMessage::Error { message }) => {
                                    warn!(%message, "orchestrator reported protocol error");
                                }
                                Err(err) => {
                                    warn!(%err, "failed to parse orchestrator message");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("connection closed by orchestrator");
                            break;
                        }
                        Some(Err(err)) => {
                            error!(%err, "websocket error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        telemetry_handle.abort();
        Ok(())
    }

    /// Reconnect with backoff after every disconnect; matches the spec's
    /// "persistent connection with auto-reconnect" requirement.
    pub async fn run_forever(&self) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if let Err(err) = self.run_once().await {
                warn!(%err, "connection attempt failed");
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    }
}

fn whoami_current_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

/// Reports load every [`TELEMETRY_INTERVAL`] under the id the current
/// connection was assigned on `registerWorker`. Ticks before that
/// registration completes are skipped rather than sent under a
/// placeholder id, since the orchestrator routes `workerStatus` by the
/// id in the message and would otherwise reject every report as
/// unknown.
async fn telemetry_loop(
    tx: UnboundedSender<WorkerMessage>,
    worker_id: Arc<AtomicU64>,
    container_driver: Arc<dyn ContainerDriver>,
    active_containers: ActiveContainers,
) {
    let mut ticker = tokio::time::interval(TELEMETRY_INTERVAL);
    loop {
        ticker.tick().await;
        let id = worker_id.load(Ordering::SeqCst);
        if id == 0 {
            continue;
        }
        let (system_cpu, system_memory) = sample_system_load();
        let (avg_container_cpu, avg_container_memory, running_containers) =
            average_container_load(&container_driver, &active_containers).await;
        let load = Load {
            cpu_usage: system_cpu.max(avg_container_cpu),
            memory_usage: system_memory.max(avg_container_memory),
            running_containers,
        };
        let status = status_for_load(load.cpu_usage, load.memory_usage);
        let message = WorkerMessage::WorkerStatus {
            worker_id: WorkerId(id),
            status,
            load,
            timestamp: Utc::now(),
        };
        if tx.send(message).is_err() {
            break;
        }
    }
}

/// Average CPU/memory across this agent's currently running containers,
/// plus how many there are. A container whose `stats` call fails (e.g.
/// it just exited) is dropped from the average rather than counted as
/// zero load.
async fn average_container_load(container_driver: &Arc<dyn ContainerDriver>, active_containers: &ActiveContainers) -> (f64, f64, usize) {
    let names: Vec<String> = active_containers.lock().await.iter().cloned().collect();
    if names.is_empty() {
        return (0.0, 0.0, 0);
    }

    let mut cpu_sum = 0.0;
    let mut memory_sum = 0.0;
    let mut sampled = 0u32;
    for name in &names {
        if let Ok(stats) = container_driver.stats(name).await {
            cpu_sum += stats.cpu_usage;
            memory_sum += stats.memory_usage;
            sampled += 1;
        }
    }

    if sampled == 0 {
        (0.0, 0.0, names.len())
    } else {
        (cpu_sum / f64::from(sampled), memory_sum / f64::from(sampled), names.len())
    }
}

/// `status` thresholds: `overloaded` above 80% CPU or 90% memory,
/// `busy` above 60% CPU or 70% memory, else `active`.
fn status_for_load(cpu_usage: f64, memory_usage: f64) -> WorkerStatus {
    if cpu_usage > 80.0 || memory_usage > 90.0 {
        WorkerStatus::Overloaded
    } else if cpu_usage > 60.0 || memory_usage > 70.0 {
        WorkerStatus::Busy
    } else {
        WorkerStatus::Active
    }
}

/// Samples host-wide CPU and memory pressure from `/proc` as
/// `(cpu_usage, memory_usage)` percentages. Neither file exists outside
/// Linux, so a missing read just falls back to `0.0` rather than
/// failing telemetry outright.
fn sample_system_load() -> (f64, f64) {
    let cpu_usage = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|contents| load_percent_from_loadavg(&contents, num_cpus::get()))
        .unwrap_or(0.0);
    let memory_usage = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|contents| memory_percent_from_meminfo(&contents))
        .unwrap_or(0.0);

    (cpu_usage, memory_usage)
}

/// CPU usage approximated as the 1-minute load average normalized by
/// core count, the same heuristic `uptime`/`top` use for "load %".
fn load_percent_from_loadavg(contents: &str, cores: usize) -> Option<f64> {
    let load_one_min: f64 = contents.split_whitespace().next()?.parse().ok()?;
    let cores = cores.max(1) as f64;
    Some((load_one_min / cores * 100.0).clamp(0.0, 100.0))
}

/// Used-memory percentage from `MemTotal`/`MemAvailable`.
fn memory_percent_from_meminfo(contents: &str) -> Option<f64> {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = meminfo_field_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = meminfo_field_kb(rest);
        }
    }
    let total = total_kb?;
    let available = available_kb?;
    if total <= 0.0 {
        return None;
    }
    Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

fn meminfo_field_kb(field: &str) -> Option<f64> {
    field.trim().split_whitespace().next()?.parse().ok()
}

#[allow(clippy::too_many_arguments)]
async fn run_deploy_task(
    repo_driver: Arc<dyn RepoDriver>,
    container_driver: Arc<dyn ContainerDriver>,
    worker_id: WorkerId,
    deployment_id: DeploymentId,
    replica_number: u32,
    repo_url: String,
    deployment_dir: String,
    tx: UnboundedSender<WorkerMessage>,
    active_containers: ActiveContainers,
) {
    let tag = format!("app-{}:{replica_number}", deployment_id.0);
    let container_name = format!("app-{}-{replica_number}", deployment_id.0);
    let port = BASE_PORT + replica_number as u16;

    active_containers.lock().await.remove(&container_name);
    cleanup(&container_driver, &container_name, &tag).await;

    let state = TaskState::Cloning;
    info!(?state, %deployment_id, replica_number, "task started");
    if let Err(err) = repo_driver.clone_shallow(&repo_url, &deployment_dir).await {
        report_failure(&tx, worker_id, deployment_id, replica_number, err.to_string());
        cleanup(&container_driver, &container_name, &tag).await;
        return;
    }

    if let Err(err) = ensure_build_descriptor(&deployment_dir).await {
        report_failure(&tx, worker_id, deployment_id, replica_number, err.to_string());
        cleanup(&container_driver, &container_name, &tag).await;
        return;
    }

    let state = TaskState::Building;
    info!(?state, %deployment_id, replica_number, "building image");
    if let Err(err) = container_driver
        .build(&deployment_dir, &tag, BUILD_MAX_ATTEMPTS, BUILD_RETRY_DELAY)
        .await
    {
        report_failure(&tx, worker_id, deployment_id, replica_number, err.to_string());
        cleanup(&container_driver, &container_name, &tag).await;
        return;
    }

    let state = TaskState::Running;
    info!(?state, %deployment_id, replica_number, "starting container");
    if let Err(err) = container_driver
        .run(&tag, &container_name, port, ResourceLimits::default())
        .await
    {
        report_failure(&tx, worker_id, deployment_id, replica_number, err.to_string());
        cleanup(&container_driver, &container_name, &tag).await;
        return;
    }
    active_containers.lock().await.insert(container_name.clone());

    let metrics = container_driver
        .stats(&container_name)
        .await
        .map(|stats| Metrics {
            cpu_usage: stats.cpu_usage,
            memory_usage: stats.memory_usage,
        })
        .unwrap_or_default();

    let state = TaskState::ReportingActive;
    info!(?state, %deployment_id, replica_number, "reporting success");
    let _ = tx.send(WorkerMessage::DeploymentStatus {
        worker_id,
        deployment_id,
        replica_id: replica_number,
        status: ReplicaStatus::Active,
        port: Some(port),
        metrics: Some(metrics),
        error: None,
        timestamp: Utc::now(),
    });
}

fn report_failure(
    tx: &UnboundedSender<WorkerMessage>,
    worker_id: WorkerId,
    deployment_id: DeploymentId,
    replica_number: u32,
    error: String,
) {
    let state = TaskState::ReportingFailed;
    warn!(?state, %deployment_id, replica_number, %error, "task failed");
    let _ = tx.send(WorkerMessage::DeploymentStatus {
        worker_id,
        deployment_id,
        replica_id: replica_number,
        status: ReplicaStatus::Failed,
        port: None,
        metrics: None,
        error: Some(error),
        timestamp: Utc::now(),
    });
}

async fn cleanup(container_driver: &Arc<dyn ContainerDriver>, container_name: &str, tag: &str) {
    let _ = container_driver.stop(container_name, STOP_GRACE).await;
    let _ = container_driver.remove_container(container_name).await;
    let _ = container_driver.remove_image(tag).await;
}

/// Step 3 of the deploy state machine: make sure the cloned repo has a
/// `requirements.txt` and a build descriptor before `docker build` runs,
/// since a repo with neither would otherwise fail the build outright.
/// Existing files are left untouched.
async fn ensure_build_descriptor(deployment_dir: &str) -> std::io::Result<()> {
    let requirements_path = format!("{deployment_dir}/requirements.txt");
    if tokio::fs::metadata(&requirements_path).await.is_err() {
        tokio::fs::write(&requirements_path, "").await?;
    }

    let dockerfile_path = format!("{deployment_dir}/Dockerfile");
    if tokio::fs::metadata(&dockerfile_path).await.is_err() {
        tokio::fs::write(&dockerfile_path, DEFAULT_DOCKERFILE).await?;
    }

    Ok(())
}

async fn run_remove_task(
    container_driver: Arc<dyn ContainerDriver>,
    worker_id: WorkerId,
    deployment_id: DeploymentId,
    replica_number: u32,
    tx: UnboundedSender<WorkerMessage>,
    active_containers: ActiveContainers,
) {
    let tag = format!("app-{}:{replica_number}", deployment_id.0);
    let container_name = format!("app-{}-{replica_number}", deployment_id.0);

    active_containers.lock().await.remove(&container_name);
    let _ = container_driver.stop(&container_name, STOP_GRACE).await;
    let _ = container_driver.remove_container(&container_name).await;
    let _ = container_driver.remove_image(&tag).await;

    let _ = tx.send(WorkerMessage::ReplicaRemoved {
        worker_id,
        deployment_id,
        replica_id: replica_number,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_thresholds() {
        assert_eq!(status_for_load(10.0, 10.0), WorkerStatus::Active);
        assert_eq!(status_for_load(65.0, 10.0), WorkerStatus::Busy);
        assert_eq!(status_for_load(10.0, 75.0), WorkerStatus::Busy);
        assert_eq!(status_for_load(85.0, 10.0), WorkerStatus::Overloaded);
        assert_eq!(status_for_load(10.0, 95.0), WorkerStatus::Overloaded);
    }

    #[test]
    fn test_ws_url_conversion() {
        let config = AgentConfig {
            hostname: "host-a".to_string(),
            main_server_url: "http://localhost:3000".to_string(),
            deployment_path: "./deployments".to_string(),
        };
        let agent = Agent::new(
            config,
            Arc::new(crate::driver::ShellRepoDriver),
            Arc::new(crate::driver::ShellContainerDriver),
        );
        assert_eq!(agent.ws_url(), "ws://localhost:3000/ws");
    }

    #[test]
    fn test_load_percent_from_loadavg_normalizes_by_cores() {
        assert_eq!(load_percent_from_loadavg("2.00 1.50 1.00 3/512 12345", 4), Some(50.0));
    }

    #[test]
    fn test_load_percent_from_loadavg_clamps_above_one_load_per_core() {
        assert_eq!(load_percent_from_loadavg("8.00 1.50 1.00 3/512 12345", 2), Some(100.0));
    }

    #[test]
    fn test_load_percent_from_loadavg_rejects_malformed_input() {
        assert_eq!(load_percent_from_loadavg("garbage", 4), None);
    }

    #[test]
    fn test_memory_percent_from_meminfo_computes_used_fraction() {
        let contents = "MemTotal:       8000000 kB\nMemFree:        1000000 kB\nMemAvailable:   2000000 kB\n";
        assert_eq!(memory_percent_from_meminfo(contents), Some(75.0));
    }

    #[test]
    fn test_memory_percent_from_meminfo_missing_fields_returns_none() {
        assert_eq!(memory_percent_from_meminfo("MemFree: 100 kB\n"), None);
    }

    #[tokio::test]
    async fn test_ensure_build_descriptor_materializes_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        ensure_build_descriptor(path).await.unwrap();

        assert!(tokio::fs::metadata(format!("{path}/requirements.txt")).await.is_ok());
        let dockerfile = tokio::fs::read_to_string(format!("{path}/Dockerfile")).await.unwrap();
        assert_eq!(dockerfile, DEFAULT_DOCKERFILE);
    }

    #[tokio::test]
    async fn test_ensure_build_descriptor_leaves_existing_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        tokio::fs::write(format!("{path}/Dockerfile"), "FROM scratch\n").await.unwrap();

        ensure_build_descriptor(path).await.unwrap();

        let dockerfile = tokio::fs::read_to_string(format!("{path}/Dockerfile")).await.unwrap();
        assert_eq!(dockerfile, "FROM scratch\n");
    }

    #[tokio::test]
    async fn test_average_container_load_skips_unknown_containers() {
        use fleet_orchestrator_core::agent::{ContainerStats, DriverError, DriverResult};

        struct FailingDriver;
        #[async_trait::async_trait]
        impl ContainerDriver for FailingDriver {
            async fn build(&self, _: &str, _: &str, _: u32, _: Duration) -> DriverResult<()> {
                Ok(())
            }
            async fn run(&self, _: &str, _: &str, _: u16, _: ResourceLimits) -> DriverResult<()> {
                Ok(())
            }
            async fn stop(&self, _: &str, _: Duration) -> DriverResult<()> {
                Ok(())
            }
            async fn remove_container(&self, _: &str) -> DriverResult<()> {
                Ok(())
            }
            async fn remove_image(&self, _: &str) -> DriverResult<()> {
                Ok(())
            }
            async fn stats(&self, _: &str) -> DriverResult<ContainerStats> {
                Err(DriverError::CommandFailed("no such container".to_string()))
            }
        }

        let active: ActiveContainers = Arc::new(Mutex::new(HashSet::from(["app-1-1".to_string()])));
        let driver: Arc<dyn ContainerDriver> = Arc::new(FailingDriver);

        let (cpu, memory, running) = average_container_load(&driver, &active).await;
        assert_eq!((cpu, memory), (0.0, 0.0));
        assert_eq!(running, 1);
    }
}
