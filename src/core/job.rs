use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a job. The only legal transition sequences are
/// `queued -> running -> succeeded | failed` and `queued -> canceled`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    /// Queued or running: the job still occupies its run's "active" slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

fn default_kind() -> String {
    "run".to_string()
}

fn default_attempt() -> u32 {
    1
}

/// One attempt to execute one run. A retried run gets a brand-new `Job` with
/// `attempt` incremented; failed jobs are never resurrected in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub run_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub requires_gpu: bool,
    pub state: JobState,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_queue_kind() -> String {
    "execution_queue".to_string()
}

fn default_version() -> u32 {
    1
}

pub fn default_max_parallel() -> usize {
    2
}

pub fn default_gpu_slots() -> u32 {
    1
}

/// The single queue document (`queue.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_queue_kind")]
    pub kind: String,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_gpu_slots")]
    pub gpu_slots: u32,
    #[serde(default)]
    pub jobs: Vec<Job>,
    /// Round-robin cursor: the group key most recently served by the
    /// scheduler. `None` until the first dispatch.
    #[serde(default)]
    pub last_served_group: Option<String>,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            version: 1,
            kind: default_queue_kind(),
            max_parallel: default_max_parallel(),
            gpu_slots: default_gpu_slots(),
            jobs: Vec::new(),
            last_served_group: None,
        }
    }
}

impl QueueState {
    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.job_id == job_id)
    }

    pub fn count_in(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DaemonPhase {
    Running,
    Stopping,
    Stopped,
}

/// Liveness beacon written by the daemon (`daemon.json`). Advisory only:
/// observers use it for display, never for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_gpu_slots")]
    pub gpu_slots: u32,
    #[serde(default)]
    pub active_jobs: usize,
    #[serde(default)]
    pub active_gpu_jobs: usize,
    pub state: DaemonPhase,
}

impl Default for DaemonState {
    fn default() -> Self {
        Self {
            version: 1,
            pid: 0,
            started_at: DateTime::<Utc>::UNIX_EPOCH,
            last_heartbeat: DateTime::<Utc>::UNIX_EPOCH,
            max_parallel: default_max_parallel(),
            gpu_slots: default_gpu_slots(),
            active_jobs: 0,
            active_gpu_jobs: 0,
            state: DaemonPhase::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job {
            job_id: "job_20260201_120000_0001".into(),
            kind: "run".into(),
            run_id: "20260201-120000-test".into(),
            group_id: Some("grp_20260201_120000_Test".into()),
            priority: 3,
            requires_gpu: true,
            state: JobState::Queued,
            attempt: 1,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = sample_job();
        let raw = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn queue_state_round_trips_through_json() {
        let state = QueueState {
            jobs: vec![sample_job()],
            last_served_group: Some("grp_a".into()),
            ..QueueState::default()
        };
        let raw = serde_json::to_string(&state).unwrap();
        let back: QueueState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn job_states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobState::Succeeded).unwrap(),
            "\"succeeded\""
        );
        assert_eq!(JobState::Canceled.to_string(), "canceled");
        assert_eq!("failed".parse::<JobState>().unwrap(), JobState::Failed);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let raw = r#"{
            "job_id": "job_x",
            "run_id": "r1",
            "state": "queued",
            "created_at": "2026-02-01T12:00:00Z"
        }"#;
        let job: Job = serde_json::from_str(raw).unwrap();
        assert_eq!(job.kind, "run");
        assert_eq!(job.attempt, 1);
        assert_eq!(job.priority, 0);
        assert!(!job.requires_gpu);
        assert!(job.group_id.is_none());
    }

    #[test]
    fn daemon_state_defaults_to_stopped() {
        let state = DaemonState::default();
        assert_eq!(state.state, DaemonPhase::Stopped);
        let raw = serde_json::to_string(&state).unwrap();
        let back: DaemonState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, state);
    }
}
