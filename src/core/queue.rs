//! Persistent job queue over `queue.json` / `daemon.json`.
//!
//! Every operation is a read-modify-write cycle: take the store's mutex,
//! re-read the document from disk, mutate, rewrite atomically. Re-reading on
//! entry lets short-lived enqueue commands interleave with the daemon without
//! clobbering each other's updates.

use crate::core::job::{DaemonState, Job, JobState, QueueState};
use crate::core::scheduler::{self, Pick};
use crate::core::store;
use crate::core::WorkspaceLayout;
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// At most one job per run may be queued or running at a time.
    #[error("run {run_id} is already queued or running")]
    DuplicateRun { run_id: String },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Manages the execution queue with atomic file operations.
pub struct QueueStore {
    layout: WorkspaceLayout,
    /// Serializes read-modify-write cycles within this process. Cross-process
    /// writers rely on atomic rewrites plus re-read-on-entry.
    mutex: Mutex<()>,
    /// Per-process suffix counter for job ids; uniqueness across daemon
    /// restarts comes from the timestamp component.
    job_counter: AtomicU64,
}

impl QueueStore {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self {
            layout,
            mutex: Mutex::new(()),
            job_counter: AtomicU64::new(0),
        }
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn queue_file(&self) -> PathBuf {
        self.layout.queue_file()
    }

    pub fn load_queue(&self) -> QueueState {
        store::load_json_or_default(&self.layout.queue_file())
    }

    pub fn save_queue(&self, state: &QueueState) -> Result<()> {
        store::save_json(&self.layout.queue_file(), state)
    }

    pub fn load_daemon(&self) -> DaemonState {
        store::load_json_or_default(&self.layout.daemon_file())
    }

    pub fn save_daemon(&self, state: &DaemonState) -> Result<()> {
        store::save_json(&self.layout.daemon_file(), state)
    }

    fn next_job_id(&self) -> String {
        let n = self.job_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("job_{}_{n:04}", Utc::now().format("%Y%m%d_%H%M%S"))
    }

    /// Append a new queued job for `run_id`.
    pub fn enqueue(
        &self,
        run_id: &str,
        group_id: Option<&str>,
        priority: i64,
        requires_gpu: bool,
    ) -> Result<Job, QueueError> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();

        if state
            .jobs
            .iter()
            .any(|j| j.run_id == run_id && j.state.is_active())
        {
            return Err(QueueError::DuplicateRun {
                run_id: run_id.to_string(),
            });
        }

        let job = Job {
            job_id: self.next_job_id(),
            kind: "run".to_string(),
            run_id: run_id.to_string(),
            group_id: group_id.map(|g| g.to_string()),
            priority,
            requires_gpu,
            state: JobState::Queued,
            attempt: 1,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        };
        state.jobs.push(job.clone());
        self.save_queue(&state)?;
        Ok(job)
    }

    /// Pick the next runnable job and flip it to `running`.
    ///
    /// Selection is delegated to [`scheduler::pick_next`]; this method applies
    /// the transition (`started_at`, round-robin cursor) and persists it.
    pub fn dequeue_next(
        &self,
        paused_groups: &HashSet<String>,
        gpu_slots_available: u32,
    ) -> Result<Option<Job>> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();

        let Some(Pick { job_id, group_key }) =
            scheduler::pick_next(&state, paused_groups, gpu_slots_available)
        else {
            return Ok(None);
        };

        let job = state
            .job_mut(&job_id)
            .expect("picked job exists in the snapshot it was picked from");
        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        let chosen = job.clone();

        state.last_served_group = Some(group_key);
        self.save_queue(&state)?;
        Ok(Some(chosen))
    }

    /// Mark a job finished. Unknown ids are a silent no-op.
    pub fn complete_job(&self, job_id: &str, success: bool, error: Option<String>) -> Result<()> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();
        if let Some(job) = state.job_mut(job_id) {
            job.state = if success {
                JobState::Succeeded
            } else {
                JobState::Failed
            };
            job.finished_at = Some(Utc::now());
            job.error = error;
            self.save_queue(&state)?;
        }
        Ok(())
    }

    /// Cancel a queued job. Returns `false` when the job is unknown or no
    /// longer queued (running jobs are never preempted).
    pub fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();
        match state.job_mut(job_id) {
            Some(job) if job.state == JobState::Queued => {
                job.state = JobState::Canceled;
                job.finished_at = Some(Utc::now());
                self.save_queue(&state)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Cancel every queued job in a group. Returns the number canceled.
    pub fn cancel_group(&self, group_id: &str) -> Result<usize> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();
        let mut count = 0;
        for job in &mut state.jobs {
            if job.group_id.as_deref() == Some(group_id) && job.state == JobState::Queued {
                job.state = JobState::Canceled;
                job.finished_at = Some(Utc::now());
                count += 1;
            }
        }
        if count > 0 {
            self.save_queue(&state)?;
        }
        Ok(count)
    }

    /// Re-enqueue each failed job in a group as a fresh job with `attempt`
    /// incremented. The failed jobs stay in place as history.
    pub fn retry_failed(&self, group_id: &str) -> Result<Vec<Job>> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();

        let retries: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| j.group_id.as_deref() == Some(group_id) && j.state == JobState::Failed)
            .map(|failed| Job {
                job_id: self.next_job_id(),
                kind: failed.kind.clone(),
                run_id: failed.run_id.clone(),
                group_id: failed.group_id.clone(),
                priority: failed.priority,
                requires_gpu: failed.requires_gpu,
                state: JobState::Queued,
                attempt: failed.attempt + 1,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                error: None,
            })
            .collect();

        if !retries.is_empty() {
            state.jobs.extend(retries.iter().cloned());
            self.save_queue(&state)?;
        }
        Ok(retries)
    }

    pub fn set_max_parallel(&self, max_parallel: usize) -> Result<()> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();
        state.max_parallel = max_parallel;
        self.save_queue(&state)
    }

    pub fn set_gpu_slots(&self, gpu_slots: u32) -> Result<()> {
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();
        state.gpu_slots = gpu_slots;
        self.save_queue(&state)
    }

    /// Drop terminal-state jobs whose `finished_at` is older than `max_age`.
    /// Returns the number removed.
    pub fn cleanup_old(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let _guard = self.mutex.lock().unwrap();
        let mut state = self.load_queue();
        let before = state.jobs.len();
        state.jobs.retain(|j| {
            j.state.is_active() || j.finished_at.map(|t| t > cutoff).unwrap_or(true)
        });
        let removed = before - state.jobs.len();
        if removed > 0 {
            self.save_queue(&state)?;
        }
        Ok(removed)
    }

    pub fn running_count(&self) -> usize {
        self.load_queue().count_in(JobState::Running)
    }

    pub fn queued_count(&self) -> usize {
        self.load_queue().count_in(JobState::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, QueueStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(WorkspaceLayout::new(dir.path()));
        (dir, store)
    }

    #[test]
    fn enqueue_assigns_job_id_and_persists() {
        let (_dir, store) = store();
        let job = store.enqueue("r1", Some("g1"), 5, false).unwrap();
        assert!(job.job_id.starts_with("job_"));
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempt, 1);

        let state = store.load_queue();
        assert_eq!(state.jobs.len(), 1);
        assert_eq!(state.jobs[0].run_id, "r1");
        assert_eq!(state.jobs[0].priority, 5);
    }

    #[test]
    fn duplicate_active_run_is_rejected() {
        let (_dir, store) = store();
        store.enqueue("r1", None, 0, false).unwrap();
        let err = store.enqueue("r1", None, 0, false).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateRun { .. }));
        assert_eq!(store.load_queue().jobs.len(), 1);
    }

    #[test]
    fn finished_run_may_be_enqueued_again() {
        let (_dir, store) = store();
        let job = store.enqueue("r1", None, 0, false).unwrap();
        store.dequeue_next(&HashSet::new(), 0).unwrap().unwrap();
        store.complete_job(&job.job_id, true, None).unwrap();

        let again = store.enqueue("r1", None, 0, false).unwrap();
        assert_ne!(again.job_id, job.job_id);
    }

    #[test]
    fn dequeue_marks_running_and_sets_cursor() {
        let (_dir, store) = store();
        store.enqueue("r1", Some("g1"), 0, false).unwrap();
        let job = store.dequeue_next(&HashSet::new(), 0).unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());

        let state = store.load_queue();
        assert_eq!(state.last_served_group.as_deref(), Some("g1"));
        assert_eq!(state.count_in(JobState::Running), 1);
    }

    #[test]
    fn complete_job_records_error_and_timestamp() {
        let (_dir, store) = store();
        let job = store.enqueue("r1", None, 0, false).unwrap();
        store.dequeue_next(&HashSet::new(), 0).unwrap();
        store
            .complete_job(&job.job_id, false, Some("boom".into()))
            .unwrap();

        let state = store.load_queue();
        let done = state.job(&job.job_id).unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.error.as_deref(), Some("boom"));
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn complete_unknown_job_is_a_no_op() {
        let (_dir, store) = store();
        store.complete_job("job_missing", true, None).unwrap();
        assert!(store.load_queue().jobs.is_empty());
    }

    #[test]
    fn cancel_only_touches_queued_jobs() {
        let (_dir, store) = store();
        let queued = store.enqueue("r1", None, 0, false).unwrap();
        assert!(store.cancel_job(&queued.job_id).unwrap());
        assert!(!store.cancel_job(&queued.job_id).unwrap());

        let running = store.enqueue("r2", None, 0, false).unwrap();
        store.dequeue_next(&HashSet::new(), 0).unwrap();
        assert!(!store.cancel_job(&running.job_id).unwrap());
    }

    #[test]
    fn cancel_group_counts_canceled_jobs() {
        let (_dir, store) = store();
        store.enqueue("r1", Some("g1"), 0, false).unwrap();
        store.enqueue("r2", Some("g1"), 0, false).unwrap();
        store.enqueue("r3", Some("g2"), 0, false).unwrap();

        assert_eq!(store.cancel_group("g1").unwrap(), 2);
        assert_eq!(store.cancel_group("g1").unwrap(), 0);
        let state = store.load_queue();
        assert_eq!(state.count_in(JobState::Canceled), 2);
        assert_eq!(state.count_in(JobState::Queued), 1);
    }

    #[test]
    fn retry_failed_creates_new_attempt() {
        let (_dir, store) = store();
        let job = store.enqueue("r1", Some("g1"), 2, true).unwrap();
        store.dequeue_next(&HashSet::new(), 1).unwrap();
        store
            .complete_job(&job.job_id, false, Some("oom".into()))
            .unwrap();

        let retries = store.retry_failed("g1").unwrap();
        assert_eq!(retries.len(), 1);
        let retry = &retries[0];
        assert_eq!(retry.run_id, "r1");
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.priority, 2);
        assert!(retry.requires_gpu);
        assert_ne!(retry.job_id, job.job_id);

        // The failed attempt stays in place as history.
        let state = store.load_queue();
        assert_eq!(state.jobs.len(), 2);
        let original = state.job(&job.job_id).unwrap();
        assert_eq!(original.state, JobState::Failed);
        assert_eq!(original.attempt, 1);
    }

    #[test]
    fn retry_with_no_failures_returns_empty() {
        let (_dir, store) = store();
        store.enqueue("r1", Some("g1"), 0, false).unwrap();
        assert!(store.retry_failed("g1").unwrap().is_empty());
    }

    #[test]
    fn cleanup_removes_only_old_terminal_jobs() {
        let (_dir, store) = store();
        let old = store.enqueue("r1", None, 0, false).unwrap();
        store.dequeue_next(&HashSet::new(), 0).unwrap();
        store.complete_job(&old.job_id, true, None).unwrap();
        store.enqueue("r2", None, 0, false).unwrap();

        // Age the finished job past the cutoff by hand.
        let mut state = store.load_queue();
        state.job_mut(&old.job_id).unwrap().finished_at =
            Some(Utc::now() - Duration::days(10));
        store.save_queue(&state).unwrap();

        assert_eq!(store.cleanup_old(Duration::days(7)).unwrap(), 1);
        let state = store.load_queue();
        assert_eq!(state.jobs.len(), 1);
        assert_eq!(state.jobs[0].run_id, "r2");
    }

    #[test]
    fn settings_updates_persist() {
        let (_dir, store) = store();
        store.set_max_parallel(8).unwrap();
        store.set_gpu_slots(3).unwrap();
        let state = store.load_queue();
        assert_eq!(state.max_parallel, 8);
        assert_eq!(state.gpu_slots, 3);
    }

    #[test]
    fn queue_state_survives_reload() {
        let (dir, store) = store();
        store.enqueue("r1", Some("g1"), 1, true).unwrap();
        let saved = store.load_queue();

        let reopened = QueueStore::new(WorkspaceLayout::new(dir.path()));
        assert_eq!(reopened.load_queue(), saved);
    }
}
