//! The slice of a worker's `result.json` that the core reads.
//!
//! Workers own the full result schema; the queue and aggregator only care
//! about `summary.primary_metric` and the file's workspace-relative path.

use crate::core::WorkspaceLayout;
use serde::{Deserialize, Serialize};
use std::fs;

/// The single numeric metric a worker designates for ranking runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryMetric {
    pub name: String,
    pub value: f64,
}

/// Read a run's primary metric and its workspace-relative `result_ref`.
///
/// Returns `(metric, result_ref)` where either part may be absent: a missing
/// or unreadable `result.json` yields `(None, None)`, a result without a
/// numeric primary metric still yields the `result_ref`.
pub fn read_primary_metric(
    layout: &WorkspaceLayout,
    run_id: &str,
) -> (Option<PrimaryMetric>, Option<String>) {
    let path = layout.result_file(run_id);
    if !path.exists() {
        return (None, None);
    }
    let result_ref = path
        .strip_prefix(layout.root())
        .map(|p| p.to_string_lossy().into_owned())
        .ok();

    let metric = fs::read_to_string(&path)
        .ok()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
        .and_then(|doc| {
            serde_json::from_value::<PrimaryMetric>(
                doc.pointer("/summary/primary_metric")?.clone(),
            )
            .ok()
        });

    (metric, result_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_result(layout: &WorkspaceLayout, run_id: &str, body: &str) {
        let dir = layout.run_dir(run_id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(layout.result_file(run_id), body).unwrap();
    }

    #[test]
    fn reads_metric_and_relative_ref() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        write_result(
            &layout,
            "r1",
            r#"{"summary": {"primary_metric": {"name": "accuracy", "value": 0.92}}}"#,
        );

        let (metric, result_ref) = read_primary_metric(&layout, "r1");
        let metric = metric.unwrap();
        assert_eq!(metric.name, "accuracy");
        assert_eq!(metric.value, 0.92);
        assert_eq!(result_ref.unwrap(), ".ml/runs/r1/result.json");
    }

    #[test]
    fn missing_result_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        assert_eq!(read_primary_metric(&layout, "absent"), (None, None));
    }

    #[test]
    fn result_without_metric_still_has_ref() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        write_result(&layout, "r1", r#"{"status": "succeeded"}"#);

        let (metric, result_ref) = read_primary_metric(&layout, "r1");
        assert!(metric.is_none());
        assert!(result_ref.is_some());
    }
}
