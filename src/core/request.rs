//! The slice of a run's `request.json` that the core reads.
//!
//! Requests are opaque documents passed through to workers; the queue only
//! inspects `device.type` to decide whether a job competes for a GPU slot.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Whether a request asks for GPU execution. Unreadable or deviceless
/// requests default to CPU.
pub fn requires_gpu(request: &Value) -> bool {
    request
        .pointer("/device/type")
        .and_then(Value::as_str)
        .map(|t| t == "gpu")
        .unwrap_or(false)
}

/// Read a run's request document.
pub fn load_request(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Like [`requires_gpu`], but straight off disk and tolerant of any failure.
pub fn run_requires_gpu(request_path: &Path) -> bool {
    load_request(request_path)
        .map(|req| requires_gpu(&req))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gpu_device_type_is_detected() {
        assert!(requires_gpu(&json!({"device": {"type": "gpu"}})));
        assert!(!requires_gpu(&json!({"device": {"type": "cpu"}})));
        assert!(!requires_gpu(&json!({"model": {"family": "linear_svc"}})));
    }

    #[test]
    fn unreadable_request_defaults_to_cpu() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        assert!(!run_requires_gpu(&path));
        fs::write(&path, "{broken").unwrap();
        assert!(!run_requires_gpu(&path));
    }
}
