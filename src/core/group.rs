//! Run groups: the `group.json` document, the pause registry, and the
//! aggregator that folds job completions into the group summary.

use crate::core::job::Job;
use crate::core::result::{read_primary_metric, PrimaryMetric};
use crate::core::{store, WorkspaceLayout};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GroupStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    /// Still counts toward the group's unfinished work.
    pub fn is_open(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Queued | RunStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRun {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub request_overrides: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub result_ref: Option<String>,
    #[serde(default)]
    pub primary_metric: Option<PrimaryMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub max_parallel: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    #[serde(default)]
    pub best_run_id: Option<String>,
    #[serde(default)]
    pub best_primary_metric: Option<PrimaryMetric>,
}

fn default_group_kind() -> String {
    "run_group".to_string()
}

fn default_group_version() -> u32 {
    1
}

/// The `group.json` document for a sweep or externally created batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default = "default_group_version")]
    pub version: u32,
    #[serde(default = "default_group_kind")]
    pub kind: String,
    pub group_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub plan_ref: Option<String>,
    pub status: GroupStatus,
    #[serde(default)]
    pub paused: bool,
    pub execution: ExecutionInfo,
    #[serde(default)]
    pub runs: Vec<GroupRun>,
    #[serde(default)]
    pub summary: GroupSummary,
}

impl Group {
    pub fn run_mut(&mut self, run_id: &str) -> Option<&mut GroupRun> {
        self.runs.iter_mut().find(|r| r.run_id == run_id)
    }

    /// Recompute summary counts and the best run from `runs[]` from scratch,
    /// then settle the terminal status once no run remains open.
    pub fn recompute(&mut self) {
        self.recompute_counts();

        if !self.runs.iter().any(|r| r.status.is_open()) {
            self.status = if self.summary.failed > 0 {
                GroupStatus::Failed
            } else {
                GroupStatus::Completed
            };
            if self.execution.finished_at.is_none() {
                self.execution.finished_at = Some(Utc::now());
            }
        }
    }

    /// Counts and best-run recompute without touching the group status; the
    /// foreground orchestrator settles terminal status itself (it also has a
    /// `canceled` outcome the daemon path never produces).
    pub fn recompute_counts(&mut self) {
        self.summary.total = self.runs.len();
        self.summary.succeeded = self
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Succeeded)
            .count();
        self.summary.failed = self
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Failed)
            .count();
        self.summary.canceled = self
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Canceled)
            .count();

        // Best run: greatest primary metric value; strict comparison keeps
        // the earliest run on ties. Higher-is-better is assumed throughout.
        self.summary.best_run_id = None;
        self.summary.best_primary_metric = None;
        for run in &self.runs {
            if let Some(metric) = &run.primary_metric {
                let better = match &self.summary.best_primary_metric {
                    None => true,
                    Some(best) => metric.value > best.value,
                };
                if better {
                    self.summary.best_run_id = Some(run.run_id.clone());
                    self.summary.best_primary_metric = Some(metric.clone());
                }
            }
        }
    }
}

pub fn load_group(layout: &WorkspaceLayout, group_id: &str) -> Option<Group> {
    let raw = fs::read_to_string(layout.group_file(group_id)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(group) => Some(group),
        Err(err) => {
            tracing::warn!("ignoring corrupt group document for {group_id}: {err}");
            None
        }
    }
}

pub fn save_group(layout: &WorkspaceLayout, group: &Group) -> Result<()> {
    store::save_json(&layout.group_file(&group.group_id), group)
}

/// Fold a finished job into its group document: run status, metric on
/// success, recomputed counts/best, terminal status. Jobs without a group and
/// groups without a document are no-ops.
pub fn record_completion(layout: &WorkspaceLayout, job: &Job, success: bool) -> Result<()> {
    let Some(group_id) = job.group_id.as_deref() else {
        return Ok(());
    };
    let Some(mut group) = load_group(layout, group_id) else {
        return Ok(());
    };

    if let Some(run) = group.run_mut(&job.run_id) {
        run.status = if success {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        if success {
            let (metric, result_ref) = read_primary_metric(layout, &job.run_id);
            if let Some(metric) = metric {
                run.primary_metric = Some(metric);
            }
            run.result_ref = result_ref;
        }
    }

    group.recompute();
    save_group(layout, &group)
}

/// Flip the named runs from `pending` to `queued` after a bulk enqueue.
pub fn mark_runs_queued(layout: &WorkspaceLayout, group_id: &str, run_ids: &[String]) -> Result<()> {
    let Some(mut group) = load_group(layout, group_id) else {
        return Ok(());
    };
    let wanted: HashSet<&str> = run_ids.iter().map(String::as_str).collect();
    for run in &mut group.runs {
        if run.status == RunStatus::Pending && wanted.contains(run.run_id.as_str()) {
            run.status = RunStatus::Queued;
        }
    }
    save_group(layout, &group)
}

/// Pause state lives inside each group's own document; this registry is the
/// scheduler-facing view of those flags.
pub struct PauseRegistry {
    layout: WorkspaceLayout,
}

impl PauseRegistry {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    pub fn is_paused(&self, group_id: &str) -> bool {
        load_group(&self.layout, group_id)
            .map(|g| g.paused)
            .unwrap_or(false)
    }

    /// Set the paused flag. Returns `false` when the group does not exist.
    pub fn set_paused(&self, group_id: &str, paused: bool) -> Result<bool> {
        let Some(mut group) = load_group(&self.layout, group_id) else {
            return Ok(false);
        };
        group.paused = paused;
        save_group(&self.layout, &group)?;
        Ok(true)
    }

    /// Scan the groups directory for every paused group id.
    pub fn paused_set(&self) -> HashSet<String> {
        let mut paused = HashSet::new();
        let Ok(entries) = fs::read_dir(self.layout.groups_dir()) else {
            return paused;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let group_id = entry.file_name().to_string_lossy().into_owned();
            if self.is_paused(&group_id) {
                paused.insert(group_id);
            }
        }
        paused
    }
}
