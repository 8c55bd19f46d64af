//! Scheduling policy: round-robin fairness between groups, strict priority
//! within a group, group-pause gating, and GPU-slot eligibility.
//!
//! `pick_next` is a pure function over a queue snapshot. It never mutates
//! state; `QueueStore::dequeue_next` applies the chosen transition.

use crate::core::job::{JobState, QueueState};
use std::collections::{BTreeMap, HashSet};

/// Group key used for jobs submitted outside any group.
pub const UNGROUPED: &str = "__ungrouped__";

/// The scheduler's choice: which job to start and which group key the
/// round-robin cursor should record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub job_id: String,
    pub group_key: String,
}

fn group_key(group_id: Option<&str>) -> &str {
    group_id.unwrap_or(UNGROUPED)
}

/// Select the next runnable job.
///
/// A job is eligible iff it is `queued`, its group is not paused, and, when
/// it requires a GPU, `gpu_available > 0`. Within each group the head is the
/// highest-priority, earliest-created job. Between groups the head created
/// earliest wins, except that the group served last time is avoided whenever
/// any other group has work (round-robin: priority never crosses the group
/// boundary).
pub fn pick_next(
    state: &QueueState,
    paused_groups: &HashSet<String>,
    gpu_available: u32,
) -> Option<Pick> {
    // Head of each group among eligible jobs: (-priority, created_at, job_id).
    // BTreeMap keeps candidate iteration deterministic.
    let mut heads: BTreeMap<&str, &crate::core::job::Job> = BTreeMap::new();
    for job in &state.jobs {
        if job.state != JobState::Queued {
            continue;
        }
        if let Some(gid) = job.group_id.as_deref() {
            if paused_groups.contains(gid) {
                continue;
            }
        }
        if job.requires_gpu && gpu_available == 0 {
            continue;
        }
        let key = group_key(job.group_id.as_deref());
        let better = match heads.get(key) {
            None => true,
            Some(head) => {
                (-job.priority, job.created_at, &job.job_id)
                    < (-head.priority, head.created_at, &head.job_id)
            }
        };
        if better {
            heads.insert(key, job);
        }
    }

    if heads.is_empty() {
        return None;
    }

    // Round-robin: prefer groups other than the one served last, falling back
    // to the full candidate set when it is the only group with work.
    let mut candidates: Vec<(&str, &crate::core::job::Job)> =
        heads.iter().map(|(k, j)| (*k, *j)).collect();
    if let Some(last) = state.last_served_group.as_deref() {
        if candidates.len() > 1 {
            let others: Vec<_> = candidates
                .iter()
                .copied()
                .filter(|(k, _)| *k != last)
                .collect();
            if !others.is_empty() {
                candidates = others;
            }
        }
    }

    let (key, job) = candidates
        .into_iter()
        .min_by(|(_, a), (_, b)| (a.created_at, &a.job_id).cmp(&(b.created_at, &b.job_id)))?;

    Some(Pick {
        job_id: job.job_id.clone(),
        group_key: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::Job;
    use chrono::{Duration, Utc};

    fn job(id: &str, run: &str, group: Option<&str>, priority: i64, offset_secs: i64) -> Job {
        Job {
            job_id: id.into(),
            kind: "run".into(),
            run_id: run.into(),
            group_id: group.map(|g| g.to_string()),
            priority,
            requires_gpu: false,
            state: JobState::Queued,
            attempt: 1,
            created_at: Utc::now() + Duration::seconds(offset_secs),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    fn state_with(jobs: Vec<Job>) -> QueueState {
        QueueState {
            jobs,
            ..QueueState::default()
        }
    }

    /// Simulate repeated dispatch: apply each pick to the snapshot the way the
    /// queue store would.
    fn drain(state: &mut QueueState, paused: &HashSet<String>, gpu: u32) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(pick) = pick_next(state, paused, gpu) {
            let job = state.job_mut(&pick.job_id).unwrap();
            job.state = JobState::Running;
            order.push(job.run_id.clone());
            state.last_served_group = Some(pick.group_key);
        }
        order
    }

    #[test]
    fn round_robin_alternates_between_groups() {
        let mut state = state_with(vec![
            job("j1", "g1-r1", Some("g1"), 0, 0),
            job("j2", "g1-r2", Some("g1"), 0, 1),
            job("j3", "g2-r1", Some("g2"), 0, 2),
            job("j4", "g2-r2", Some("g2"), 0, 3),
        ]);
        let order = drain(&mut state, &HashSet::new(), 0);
        assert_eq!(order, vec!["g1-r1", "g2-r1", "g1-r2", "g2-r2"]);
    }

    #[test]
    fn priority_orders_within_a_group() {
        let mut state = state_with(vec![
            job("j1", "low", Some("g1"), 0, 0),
            job("j2", "high", Some("g1"), 10, 1),
            job("j3", "med", Some("g1"), 5, 2),
        ]);
        let order = drain(&mut state, &HashSet::new(), 0);
        assert_eq!(order, vec!["high", "med", "low"]);
    }

    #[test]
    fn priority_does_not_cross_group_boundaries() {
        // g1 holds all the high-priority work, yet g2 is still served between
        // g1 dispatches.
        let mut state = state_with(vec![
            job("j1", "g1-r1", Some("g1"), 100, 0),
            job("j2", "g1-r2", Some("g1"), 100, 1),
            job("j3", "g2-r1", Some("g2"), 0, 2),
        ]);
        let order = drain(&mut state, &HashSet::new(), 0);
        assert_eq!(order, vec!["g1-r1", "g2-r1", "g1-r2"]);
    }

    #[test]
    fn paused_groups_are_skipped() {
        let mut state = state_with(vec![
            job("j1", "r1", Some("g_paused"), 0, 0),
            job("j2", "r2", Some("g_active"), 0, 1),
        ]);
        let paused: HashSet<String> = ["g_paused".to_string()].into();
        let pick = pick_next(&state, &paused, 0).unwrap();
        assert_eq!(pick.job_id, "j2");

        state.job_mut("j2").unwrap().state = JobState::Running;
        state.last_served_group = Some(pick.group_key);
        assert_eq!(pick_next(&state, &paused, 0), None);
    }

    #[test]
    fn gpu_jobs_need_an_available_slot() {
        let mut gpu_job = job("j1", "gpu-run", Some("g1"), 10, 0);
        gpu_job.requires_gpu = true;
        let cpu_job = job("j2", "cpu-run", Some("g1"), 0, 1);
        let state = state_with(vec![gpu_job, cpu_job]);

        let pick = pick_next(&state, &HashSet::new(), 0).unwrap();
        assert_eq!(pick.job_id, "j2");

        let pick = pick_next(&state, &HashSet::new(), 1).unwrap();
        assert_eq!(pick.job_id, "j1");
    }

    #[test]
    fn ungrouped_jobs_form_their_own_lane() {
        let mut state = state_with(vec![
            job("j1", "solo", None, 0, 0),
            job("j2", "g1-r1", Some("g1"), 0, 1),
        ]);
        let order = drain(&mut state, &HashSet::new(), 0);
        assert_eq!(order, vec!["solo", "g1-r1"]);
        assert_eq!(state.last_served_group.as_deref(), Some("g1"));
    }

    #[test]
    fn falls_back_to_last_served_group_when_it_is_the_only_one() {
        let mut state = state_with(vec![
            job("j1", "r1", Some("g1"), 0, 0),
            job("j2", "r2", Some("g1"), 0, 1),
        ]);
        state.last_served_group = Some("g1".into());
        let pick = pick_next(&state, &HashSet::new(), 0).unwrap();
        assert_eq!(pick.job_id, "j1");
    }

    #[test]
    fn empty_queue_yields_none() {
        let state = QueueState::default();
        assert_eq!(pick_next(&state, &HashSet::new(), 4), None);
    }

    #[test]
    fn running_and_terminal_jobs_are_ignored() {
        let mut running = job("j1", "r1", Some("g1"), 50, 0);
        running.state = JobState::Running;
        let mut failed = job("j2", "r2", Some("g1"), 50, 1);
        failed.state = JobState::Failed;
        let queued = job("j3", "r3", Some("g1"), 0, 2);
        let state = state_with(vec![running, failed, queued]);

        let pick = pick_next(&state, &HashSet::new(), 0).unwrap();
        assert_eq!(pick.job_id, "j3");
    }
}
