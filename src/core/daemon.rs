//! The execution daemon: discovers ready work, launches child workers up to
//! the configured concurrency, reaps them, folds results into queue and group
//! state, maintains a heartbeat, and shuts down gracefully on SIGINT/SIGTERM.

use crate::config::DaemonConfig;
use crate::core::gpu::GpuOracle;
use crate::core::group::{self, PauseRegistry};
use crate::core::job::{DaemonPhase, DaemonState, Job};
use crate::core::lock::{LockError, WorkspaceLock};
use crate::core::queue::QueueStore;
use crate::core::WorkspaceLayout;
use crate::utils::tail_chars;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Hard wall-clock ceiling per child worker.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(3600);
/// How long shutdown waits for in-flight children before abandoning them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);
/// How much of a failed worker's stderr is recorded on the job.
const STDERR_TAIL_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("another daemon is already running (pid: {pid:?})")]
    AlreadyRunning { pid: Option<u32> },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The worker program the daemon spawns for each job.
///
/// The invocation shape is fixed by the worker contract:
/// `<program> run --run-dir <abs path> --workspace <abs path>`.
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    program: PathBuf,
}

impl RunnerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            config
                .runner
                .clone()
                .unwrap_or_else(|| PathBuf::from("runforge-runner")),
        )
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn argv(&self, run_dir: &Path, workspace: &Path) -> Vec<OsString> {
        vec![
            OsString::from("run"),
            OsString::from("--run-dir"),
            run_dir.as_os_str().to_os_string(),
            OsString::from("--workspace"),
            workspace.as_os_str().to_os_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl WorkerOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Run one worker to completion.
///
/// The child's combined output is captured but not streamed; workers write
/// their own `logs.txt` into the run directory. On timeout the child is never
/// killed, only abandoned, and the job is failed with a fixed message.
pub async fn execute_worker(
    runner: &RunnerCommand,
    run_dir: &Path,
    workspace: &Path,
) -> WorkerOutcome {
    if !run_dir.exists() {
        return WorkerOutcome::failure(format!(
            "Run directory not found: {}",
            run_dir.display()
        ));
    }

    let mut command = Command::new(runner.program());
    command
        .args(runner.argv(run_dir, workspace))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            return WorkerOutcome::failure(format!(
                "Failed to spawn worker {}: {err}",
                runner.program().display()
            ))
        }
    };

    match tokio::time::timeout(JOB_TIMEOUT, child.wait_with_output()).await {
        Err(_) => WorkerOutcome::failure("Job timed out after 1 hour"),
        Ok(Err(err)) => WorkerOutcome::failure(format!("Failed to wait for worker: {err}")),
        Ok(Ok(output)) => {
            if output.status.success() {
                return WorkerOutcome::ok();
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                WorkerOutcome::failure(format!(
                    "Exit code: {}",
                    output.status.code().unwrap_or(-1)
                ))
            } else {
                WorkerOutcome::failure(tail_chars(stderr, STDERR_TAIL_CHARS))
            }
        }
    }
}

/// Counters shared between the main loop and the heartbeat task.
struct SharedStatus {
    pid: u32,
    started_at: DateTime<Utc>,
    max_parallel: usize,
    gpu_slots: u32,
    active_jobs: AtomicUsize,
    active_gpu_jobs: AtomicUsize,
    stopping: AtomicBool,
}

impl SharedStatus {
    fn snapshot(&self, phase: Option<DaemonPhase>) -> DaemonState {
        let phase = phase.unwrap_or(if self.stopping.load(Ordering::SeqCst) {
            DaemonPhase::Stopping
        } else {
            DaemonPhase::Running
        });
        DaemonState {
            version: 1,
            pid: self.pid,
            started_at: self.started_at,
            last_heartbeat: Utc::now(),
            max_parallel: self.max_parallel,
            gpu_slots: self.gpu_slots,
            active_jobs: self.active_jobs.load(Ordering::SeqCst),
            active_gpu_jobs: self.active_gpu_jobs.load(Ordering::SeqCst),
            state: phase,
        }
    }
}

struct ActiveJob {
    job: Job,
    handle: JoinHandle<WorkerOutcome>,
}

/// Background daemon that processes the job queue. One per workspace,
/// enforced by the workspace lock.
pub struct ExecutionDaemon {
    layout: WorkspaceLayout,
    queue: Arc<QueueStore>,
    pauses: PauseRegistry,
    oracle: Arc<dyn GpuOracle>,
    runner: RunnerCommand,
    max_parallel: usize,
    gpu_slots: u32,
    heartbeat_interval: Duration,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    status: Arc<SharedStatus>,
    active: HashMap<String, ActiveJob>,
}

impl ExecutionDaemon {
    pub fn new(workspace: PathBuf, config: &DaemonConfig, oracle: Arc<dyn GpuOracle>) -> Self {
        let layout = WorkspaceLayout::new(workspace);
        Self {
            queue: Arc::new(QueueStore::new(layout.clone())),
            pauses: PauseRegistry::new(layout.clone()),
            oracle,
            runner: RunnerCommand::from_config(config),
            max_parallel: config.max_parallel,
            gpu_slots: config.gpu_slots,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            shutdown: Arc::new(AtomicBool::new(false)),
            status: Arc::new(SharedStatus {
                pid: std::process::id(),
                started_at: Utc::now(),
                max_parallel: config.max_parallel,
                gpu_slots: config.gpu_slots,
                active_jobs: AtomicUsize::new(0),
                active_gpu_jobs: AtomicUsize::new(0),
                stopping: AtomicBool::new(false),
            }),
            active: HashMap::new(),
            layout,
        }
    }

    /// Run the daemon until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        tracing::info!("[DAEMON] runforge daemon {}", crate::core::version());
        tracing::info!("[DAEMON] Workspace: {}", self.layout.root().display());
        tracing::info!("[DAEMON] Max parallel: {}", self.max_parallel);
        tracing::info!("[DAEMON] GPU slots: {}", self.gpu_slots);
        tracing::info!("[DAEMON] PID: {}", self.status.pid);

        let probe = self.oracle.detect();
        if probe.available {
            tracing::info!("[DAEMON] {}", probe.summary());
        } else {
            tracing::info!("[DAEMON] {}", probe.summary());
            if self.gpu_slots > 0 {
                tracing::warn!(
                    "[DAEMON] gpu_slots={} but no GPU detected",
                    self.gpu_slots
                );
            }
        }

        std::fs::create_dir_all(self.layout.queue_dir())
            .map_err(|err| DaemonError::Other(err.into()))?;

        let mut lock = WorkspaceLock::new(self.layout.lock_file());
        match lock.acquire() {
            Ok(()) => {}
            Err(LockError::Contended) => {
                return Err(DaemonError::AlreadyRunning {
                    pid: lock.owner_pid(),
                })
            }
            Err(LockError::Io(err)) => return Err(DaemonError::Other(err)),
        }

        let result = self.run_locked().await;
        lock.release();
        result.map_err(DaemonError::Other)
    }

    async fn run_locked(&mut self) -> Result<()> {
        self.queue.set_max_parallel(self.max_parallel)?;
        self.queue.set_gpu_slots(self.gpu_slots)?;
        self.queue.save_daemon(&self.status.snapshot(Some(DaemonPhase::Running)))?;

        let signal_task = spawn_signal_listener(self.shutdown.clone());
        let heartbeat_task = spawn_heartbeat(
            self.queue.clone(),
            self.status.clone(),
            self.heartbeat_interval,
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            self.reap_finished().await;
            self.schedule_ready()?;
            tokio::time::sleep(self.poll_interval).await;
        }

        // Graceful shutdown: stop scheduling, drain in-flight children for up
        // to SHUTDOWN_GRACE, then abandon the rest.
        tracing::info!("[DAEMON] Waiting for active jobs to complete...");
        self.status.stopping.store(true, Ordering::SeqCst);
        self.queue
            .save_daemon(&self.status.snapshot(Some(DaemonPhase::Stopping)))?;

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while !self.active.is_empty() && tokio::time::Instant::now() < deadline {
            self.reap_finished().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        for (job_id, entry) in self.active.drain() {
            // The child keeps running; only the job record is closed out.
            tracing::warn!(
                "[DAEMON] Abandoning job {job_id} ({}) at shutdown",
                entry.job.run_id
            );
            entry.handle.abort();
            self.queue
                .complete_job(&job_id, false, Some("Daemon shutdown".to_string()))?;
        }
        self.status.active_jobs.store(0, Ordering::SeqCst);
        self.status.active_gpu_jobs.store(0, Ordering::SeqCst);

        heartbeat_task.abort();
        signal_task.abort();
        self.queue
            .save_daemon(&self.status.snapshot(Some(DaemonPhase::Stopped)))?;
        tracing::info!("[DAEMON] Shutdown complete");
        Ok(())
    }

    /// Collect exited children and fold their outcomes into queue and group
    /// state.
    async fn reap_finished(&mut self) {
        let finished: Vec<String> = self
            .active
            .iter()
            .filter(|(_, entry)| entry.handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in finished {
            let Some(entry) = self.active.remove(&job_id) else {
                continue;
            };
            let outcome = match entry.handle.await {
                Ok(outcome) => outcome,
                Err(err) => WorkerOutcome::failure(format!("Worker task failed: {err}")),
            };

            if entry.job.requires_gpu {
                self.status.active_gpu_jobs.fetch_sub(1, Ordering::SeqCst);
            }
            self.status
                .active_jobs
                .store(self.active.len(), Ordering::SeqCst);

            if let Err(err) =
                self.queue
                    .complete_job(&job_id, outcome.success, outcome.error.clone())
            {
                tracing::error!("[DAEMON] Failed to record completion of {job_id}: {err:#}");
            }
            if let Err(err) = group::record_completion(&self.layout, &entry.job, outcome.success) {
                tracing::error!(
                    "[DAEMON] Failed to update group {:?}: {err:#}",
                    entry.job.group_id
                );
            }

            let status = if outcome.success { "succeeded" } else { "failed" };
            let gpu_tag = if entry.job.requires_gpu { " [GPU]" } else { "" };
            tracing::info!(
                "[DAEMON] Job {job_id} ({}){gpu_tag} {status}",
                entry.job.run_id
            );
        }
    }

    /// Start queued jobs until the pool is full or nothing is eligible.
    /// GPU availability is recomputed before each dispatch so one pass cannot
    /// oversubscribe the GPU slots.
    fn schedule_ready(&mut self) -> Result<()> {
        while self.active.len() < self.max_parallel {
            let active_gpu = self.status.active_gpu_jobs.load(Ordering::SeqCst) as u32;
            let gpu_available = self.gpu_slots.saturating_sub(active_gpu);
            let paused = self.pauses.paused_set();

            let Some(job) = self.queue.dequeue_next(&paused, gpu_available)? else {
                break;
            };

            let gpu_tag = if job.requires_gpu { " [GPU]" } else { "" };
            tracing::info!(
                "[DAEMON] Starting job {} ({}){gpu_tag}",
                job.job_id,
                job.run_id
            );

            let runner = self.runner.clone();
            let run_dir = self.layout.run_dir(&job.run_id);
            let workspace = self.layout.root().to_path_buf();
            let handle =
                tokio::spawn(
                    async move { execute_worker(&runner, &run_dir, &workspace).await },
                );

            if job.requires_gpu {
                self.status.active_gpu_jobs.fetch_add(1, Ordering::SeqCst);
            }
            self.active
                .insert(job.job_id.clone(), ActiveJob { job, handle });
            self.status
                .active_jobs
                .store(self.active.len(), Ordering::SeqCst);
        }
        Ok(())
    }
}

fn spawn_signal_listener(shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("[DAEMON] Shutdown requested");
        shutdown.store(true, Ordering::SeqCst);
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Heartbeat: rewrite `daemon.json` on every tick. The beacon is advisory;
/// write failures are logged and ignored.
fn spawn_heartbeat(
    queue: Arc<QueueStore>,
    status: Arc<SharedStatus>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = queue.save_daemon(&status.snapshot(None)) {
                tracing::warn!("Heartbeat error: {err:#}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_command_line_matches_the_contract() {
        let runner = RunnerCommand::new("runforge-runner");
        let argv = runner.argv(Path::new("/ws/.ml/runs/r1"), Path::new("/ws"));
        let argv: Vec<String> = argv
            .into_iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            argv,
            vec!["run", "--run-dir", "/ws/.ml/runs/r1", "--workspace", "/ws"]
        );
    }

    #[test]
    fn runner_defaults_to_path_lookup() {
        let config = DaemonConfig::default();
        let runner = RunnerCommand::from_config(&config);
        assert_eq!(runner.program(), Path::new("runforge-runner"));

        let config = DaemonConfig {
            runner: Some(PathBuf::from("/opt/trainer")),
            ..DaemonConfig::default()
        };
        assert_eq!(
            RunnerCommand::from_config(&config).program(),
            Path::new("/opt/trainer")
        );
    }

    #[tokio::test]
    async fn missing_run_directory_fails_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RunnerCommand::new("runforge-runner");
        let outcome =
            execute_worker(&runner, &dir.path().join("absent"), dir.path()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Run directory not found"));
    }

    #[tokio::test]
    async fn unspawnable_runner_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RunnerCommand::new(dir.path().join("no-such-binary"));
        let outcome = execute_worker(&runner, dir.path(), dir.path()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Failed to spawn worker"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_exit_codes_map_to_outcomes() {
        let dir = tempfile::tempdir().unwrap();

        let ok = execute_worker(&RunnerCommand::new("/bin/true"), dir.path(), dir.path()).await;
        assert_eq!(ok, WorkerOutcome::ok());

        let failed =
            execute_worker(&RunnerCommand::new("/bin/false"), dir.path(), dir.path()).await;
        assert!(!failed.success);
        // /bin/false writes nothing to stderr, so the exit code is recorded.
        assert_eq!(failed.error.as_deref(), Some("Exit code: 1"));
    }

    #[test]
    fn status_snapshot_reflects_counters_and_phase() {
        let status = SharedStatus {
            pid: 42,
            started_at: Utc::now(),
            max_parallel: 4,
            gpu_slots: 2,
            active_jobs: AtomicUsize::new(3),
            active_gpu_jobs: AtomicUsize::new(1),
            stopping: AtomicBool::new(false),
        };

        let state = status.snapshot(None);
        assert_eq!(state.pid, 42);
        assert_eq!(state.active_jobs, 3);
        assert_eq!(state.active_gpu_jobs, 1);
        assert_eq!(state.state, DaemonPhase::Running);

        status.stopping.store(true, Ordering::SeqCst);
        assert_eq!(status.snapshot(None).state, DaemonPhase::Stopping);
        assert_eq!(
            status.snapshot(Some(DaemonPhase::Stopped)).state,
            DaemonPhase::Stopped
        );
    }
}
