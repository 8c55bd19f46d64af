//! Sweep plans: validation, expansion of a parameter grid into concrete runs,
//! per-run input files, and the foreground orchestrator that executes a plan
//! without the daemon.

use crate::core::daemon::{execute_worker, RunnerCommand};
use crate::core::group::{
    save_group, ExecutionInfo, Group, GroupRun, GroupStatus, GroupSummary, RunStatus,
};
use crate::core::result::{read_primary_metric, PrimaryMetric};
use crate::core::{store, WorkspaceLayout};
use crate::tokens;
use crate::utils::sanitize_component;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupSection {
    #[serde(default = "default_group_name")]
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_group_name() -> String {
    "Unnamed Sweep".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepParameter {
    pub path: String,
    /// A JSON array of candidate values; a bare scalar is auto-wrapped.
    pub values: Value,
}

impl SweepParameter {
    fn values_vec(&self) -> Vec<Value> {
        match &self.values {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }
}

fn default_strategy_type() -> String {
    "grid".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    #[serde(rename = "type", default = "default_strategy_type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Vec<SweepParameter>,
    /// For the `list` strategy: one overrides map per run.
    #[serde(default)]
    pub runs: Vec<Map<String, Value>>,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            kind: default_strategy_type(),
            parameters: Vec::new(),
            runs: Vec::new(),
        }
    }
}

fn default_plan_max_parallel() -> usize {
    1
}

fn default_stop_on_cancel() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_plan_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_stop_on_cancel")]
    pub stop_on_cancel: bool,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_parallel: default_plan_max_parallel(),
            fail_fast: false,
            stop_on_cancel: default_stop_on_cancel(),
        }
    }
}

/// Parsed `sweep_plan.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepPlan {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub group: GroupSection,
    #[serde(default)]
    pub base_request: Value,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub execution: ExecutionSection,
}

pub const STRATEGY_GRID: &str = "grid";
pub const STRATEGY_LIST: &str = "list";

impl SweepPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse plan {}", path.display()))
    }

    /// Validate the plan. Returns human-readable errors (empty if valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.version != 1 {
            errors.push(format!("Unsupported plan version: {}", self.version));
        }
        if self.kind != "sweep_plan" {
            errors.push(format!("Invalid kind: {}, expected 'sweep_plan'", self.kind));
        }
        if self.workspace.is_empty() {
            errors.push("workspace is required".to_string());
        }
        if !self.base_request.as_object().is_some_and(|o| !o.is_empty()) {
            errors.push("base_request is required".to_string());
        }
        match self.strategy.kind.as_str() {
            STRATEGY_GRID => {
                if self.strategy.parameters.is_empty() {
                    errors.push("grid strategy requires at least one parameter".to_string());
                }
            }
            STRATEGY_LIST => {
                if self.strategy.runs.is_empty() {
                    errors.push("list strategy requires at least one run".to_string());
                }
            }
            other => errors.push(format!("Unsupported strategy type: {other}")),
        }
        if self.execution.max_parallel < 1 {
            errors.push("max_parallel must be >= 1".to_string());
        }

        errors
    }

    /// Expand the plan into concrete run configs. Run ids share one timestamp
    /// prefix across the batch.
    pub fn expand(&self) -> Vec<RunConfig> {
        self.expand_at(Utc::now())
    }

    fn expand_at(&self, now: DateTime<Utc>) -> Vec<RunConfig> {
        let stamp = now.format("%Y%m%d-%H%M%S");
        let run_id = |idx: usize| format!("{stamp}-sweep-{idx:04}");

        match self.strategy.kind.as_str() {
            STRATEGY_LIST => self
                .strategy
                .runs
                .iter()
                .enumerate()
                .map(|(idx, overrides)| RunConfig {
                    run_id: run_id(idx),
                    overrides: overrides.clone(),
                })
                .collect(),
            _ => {
                if self.strategy.parameters.is_empty() {
                    return Vec::new();
                }
                let values: Vec<Vec<Value>> = self
                    .strategy
                    .parameters
                    .iter()
                    .map(SweepParameter::values_vec)
                    .collect();
                let total: usize = values.iter().map(Vec::len).product();

                // Cartesian product with the first parameter varying slowest.
                let mut configs = Vec::with_capacity(total);
                for idx in 0..total {
                    let mut overrides = Map::new();
                    let mut remainder = idx;
                    for (param, vals) in self.strategy.parameters.iter().zip(&values).rev() {
                        let pick = remainder % vals.len();
                        remainder /= vals.len();
                        overrides.insert(param.path.clone(), vals[pick].clone());
                    }
                    configs.push(RunConfig {
                        run_id: run_id(idx),
                        overrides,
                    });
                }
                configs
            }
        }
    }
}

/// Configuration for a single run in the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub run_id: String,
    pub overrides: Map<String, Value>,
}

/// Apply dot-path overrides to a base request.
///
/// The base is never mutated; the returned document is a deep copy. Missing
/// intermediate objects are created, and a `null` override removes the leaf
/// key instead of assigning it.
pub fn apply_overrides(base: &Value, overrides: &Map<String, Value>) -> Value {
    let mut result = base.clone();
    if !result.is_object() {
        result = Value::Object(Map::new());
    }

    for (path, value) in overrides {
        let mut parts = path.split('.').peekable();
        let mut current = &mut result;
        while let Some(part) = parts.next() {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if parts.peek().is_none() {
                let obj = current
                    .as_object_mut()
                    .expect("value was just replaced with an object");
                if value.is_null() {
                    obj.remove(part);
                } else {
                    obj.insert(part.to_string(), value.clone());
                }
            } else {
                let obj = current
                    .as_object_mut()
                    .expect("value was just replaced with an object");
                current = obj
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
            }
        }
    }

    result
}

/// Generate a group id: timestamp plus the sanitized first 20 characters of
/// the group name.
pub fn generate_group_id(name: &str, now: DateTime<Utc>) -> String {
    format!(
        "grp_{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        sanitize_component(name, 20)
    )
}

/// Create a run directory and its `request.json`: the base request with
/// overrides applied plus the injected provenance fields.
pub fn create_run_directory(
    layout: &WorkspaceLayout,
    plan: &SweepPlan,
    group_id: &str,
    run: &RunConfig,
) -> Result<PathBuf> {
    let run_dir = layout.run_dir(&run.run_id);
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run directory {}", run_dir.display()))?;

    let mut request = apply_overrides(&plan.base_request, &run.overrides);
    if let Some(obj) = request.as_object_mut() {
        obj.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));
        obj.insert(
            "created_by".into(),
            Value::String(crate::core::version().to_string()),
        );
        obj.insert("sweep_group_id".into(), Value::String(group_id.to_string()));
    }
    store::save_json(&layout.request_file(&run.run_id), &request)?;
    Ok(run_dir)
}

/// Create the group directory, copy the plan into it, and write the initial
/// `group.json` with every run `pending`.
pub fn bootstrap_group(
    layout: &WorkspaceLayout,
    plan: &SweepPlan,
    plan_path: &Path,
    group_id: &str,
    runs: &[RunConfig],
) -> Result<Group> {
    let group_dir = layout.group_dir(group_id);
    fs::create_dir_all(&group_dir)
        .with_context(|| format!("failed to create group directory {}", group_dir.display()))?;
    fs::copy(plan_path, layout.plan_file(group_id))
        .with_context(|| format!("failed to copy plan into {}", group_dir.display()))?;

    let now = Utc::now();
    let group = Group {
        version: 1,
        kind: "run_group".into(),
        group_id: group_id.to_string(),
        created_at: now,
        created_by: crate::core::version().to_string(),
        name: plan.group.name.clone(),
        notes: plan.group.notes.clone(),
        plan_ref: Some("plan.json".into()),
        status: GroupStatus::Running,
        paused: false,
        execution: ExecutionInfo {
            max_parallel: plan.execution.max_parallel,
            started_at: now,
            finished_at: None,
            cancelled: false,
        },
        runs: runs
            .iter()
            .map(|rc| GroupRun {
                run_id: rc.run_id.clone(),
                status: RunStatus::Pending,
                request_overrides: rc.overrides.clone(),
                result_ref: None,
                primary_metric: None,
            })
            .collect(),
        summary: GroupSummary {
            total: runs.len(),
            ..GroupSummary::default()
        },
    };
    save_group(layout, &group)?;
    Ok(group)
}

/// Outcome of one foreground run.
#[derive(Debug, Clone)]
struct RunOutcome {
    run_id: String,
    status: RunStatus,
    primary_metric: Option<PrimaryMetric>,
    result_ref: Option<String>,
}

/// Terminal state of a completed foreground sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed,
    Failed,
    Canceled,
}

/// Executes a plan directly, without the daemon: expansion, bounded
/// concurrency, fail-fast, cancel-on-signal.
pub struct SweepOrchestrator {
    plan: SweepPlan,
    plan_path: PathBuf,
    layout: WorkspaceLayout,
    group_id: String,
    runner: RunnerCommand,
    cancel: Arc<AtomicBool>,
}

impl SweepOrchestrator {
    pub fn new(plan: SweepPlan, plan_path: PathBuf, runner: RunnerCommand) -> Self {
        let layout = WorkspaceLayout::new(PathBuf::from(&plan.workspace));
        let group_id = generate_group_id(&plan.group.name, Utc::now());
        Self {
            plan,
            plan_path,
            layout,
            group_id,
            runner,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Handle used by signal listeners to request cancellation of remaining
    /// runs. Runs already in flight are awaited, not interrupted.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Execute the full sweep.
    pub async fn execute(&self) -> Result<SweepOutcome> {
        let run_configs = self.plan.expand();
        anyhow::ensure!(!run_configs.is_empty(), "no runs to execute (empty expansion)");

        let total = run_configs.len();
        println!(
            "Sweep plan: {total} runs, max_parallel={}",
            self.plan.execution.max_parallel
        );
        println!("{}", tokens::group_start(&self.group_id, total));

        let group = bootstrap_group(
            &self.layout,
            &self.plan,
            &self.plan_path,
            &self.group_id,
            &run_configs,
        )?;
        println!("Group directory: {}", self.layout.group_dir(&self.group_id).display());

        let group = Arc::new(Mutex::new(group));
        let semaphore = Arc::new(Semaphore::new(self.plan.execution.max_parallel));
        let mut tasks: JoinSet<Result<RunOutcome>> = JoinSet::new();

        for (index, rc) in run_configs.iter().enumerate() {
            let layout = self.layout.clone();
            let plan = self.plan.clone();
            let group_id = self.group_id.clone();
            let runner = self.runner.clone();
            let cancel = self.cancel.clone();
            let semaphore = semaphore.clone();
            let rc = rc.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                if cancel.load(Ordering::SeqCst) {
                    return Ok(RunOutcome {
                        run_id: rc.run_id,
                        status: RunStatus::Canceled,
                        primary_metric: None,
                        result_ref: None,
                    });
                }

                println!("{}", tokens::group_run(&rc.run_id, index + 1, total));
                let run_dir = create_run_directory(&layout, &plan, &group_id, &rc)?;
                let outcome = execute_worker(&runner, &run_dir, layout.root()).await;

                let status = if outcome.success {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Failed
                };
                let (primary_metric, result_ref) = read_primary_metric(&layout, &rc.run_id);
                println!("{}", tokens::group_run_complete(&rc.run_id, &status.to_string()));

                Ok(RunOutcome {
                    run_id: rc.run_id,
                    status,
                    primary_metric,
                    result_ref,
                })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    tracing::error!("sweep run failed to start: {err:#}");
                    continue;
                }
                Err(err) => {
                    tracing::error!("sweep task panicked: {err}");
                    continue;
                }
            };

            let failed = outcome.status == RunStatus::Failed;
            self.apply_outcome(&group, outcome).await?;

            if failed && self.plan.execution.fail_fast {
                println!("Fail-fast triggered, canceling remaining runs");
                self.cancel.store(true, Ordering::SeqCst);
            }
        }

        self.finalize(&group).await
    }

    async fn apply_outcome(&self, group: &Arc<Mutex<Group>>, outcome: RunOutcome) -> Result<()> {
        let mut group = group.lock().await;
        if let Some(run) = group.run_mut(&outcome.run_id) {
            run.status = outcome.status;
            run.result_ref = outcome.result_ref;
            if outcome.primary_metric.is_some() {
                run.primary_metric = outcome.primary_metric;
            }
        }
        group.recompute_counts();
        save_group(&self.layout, &group)
    }

    async fn finalize(&self, group: &Arc<Mutex<Group>>) -> Result<SweepOutcome> {
        let canceled = self.cancel.load(Ordering::SeqCst);
        let mut group = group.lock().await;

        for run in &mut group.runs {
            if run.status.is_open() {
                run.status = RunStatus::Canceled;
            }
        }
        group.recompute_counts();
        group.execution.finished_at = Some(Utc::now());

        let outcome = if canceled {
            group.status = GroupStatus::Canceled;
            group.execution.cancelled = true;
            println!("{}", tokens::group_canceled(&self.group_id));
            SweepOutcome::Canceled
        } else if group.summary.failed > 0 {
            group.status = GroupStatus::Failed;
            SweepOutcome::Failed
        } else {
            group.status = GroupStatus::Completed;
            SweepOutcome::Completed
        };

        println!(
            "{}",
            tokens::group_complete(
                &self.group_id,
                group.summary.succeeded,
                group.summary.failed,
                group.summary.canceled,
            )
        );

        save_group(&self.layout, &group)?;
        Ok(outcome)
    }
}
