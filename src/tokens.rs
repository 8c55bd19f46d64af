//! RF tokens for group progress reporting.
//!
//! These tokens are written to stdout/logs and parsed by the desktop app for
//! timeline display. The format is fixed; do not change it without updating
//! the parser on the other side.

pub fn group_start(group_id: &str, total_runs: usize) -> String {
    format!("[RF:GROUP=START {group_id} runs={total_runs}]")
}

pub fn group_run(run_id: &str, index: usize, total: usize) -> String {
    format!("[RF:GROUP=RUN {run_id} {index}/{total}]")
}

pub fn group_run_complete(run_id: &str, status: &str) -> String {
    format!("[RF:GROUP=RUN_DONE {run_id} status={status}]")
}

pub fn group_complete(group_id: &str, succeeded: usize, failed: usize, canceled: usize) -> String {
    format!(
        "[RF:GROUP=COMPLETE {group_id} succeeded={succeeded} failed={failed} canceled={canceled}]"
    )
}

pub fn group_canceled(group_id: &str) -> String {
    format!("[RF:GROUP=CANCELED {group_id}]")
}

pub fn group_enqueued(group_id: &str, runs: usize) -> String {
    format!("[RF:GROUP=ENQUEUED {group_id} runs={runs}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_formats_are_fixed() {
        assert_eq!(group_start("grp_1", 4), "[RF:GROUP=START grp_1 runs=4]");
        assert_eq!(group_run("r1", 2, 4), "[RF:GROUP=RUN r1 2/4]");
        assert_eq!(
            group_run_complete("r1", "succeeded"),
            "[RF:GROUP=RUN_DONE r1 status=succeeded]"
        );
        assert_eq!(
            group_complete("grp_1", 3, 1, 0),
            "[RF:GROUP=COMPLETE grp_1 succeeded=3 failed=1 canceled=0]"
        );
        assert_eq!(group_canceled("grp_1"), "[RF:GROUP=CANCELED grp_1]");
        assert_eq!(group_enqueued("grp_1", 4), "[RF:GROUP=ENQUEUED grp_1 runs=4]");
    }
}
