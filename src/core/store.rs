//! Atomic JSON persistence for queue, daemon and group state files.
//!
//! Writes go to a temp file in the target directory, are flushed and fsynced,
//! then renamed over the target. A concurrent reader always observes either
//! the previous complete document or the new one, never a partial write.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Persist `value` to `path` via temp-file-plus-rename.
///
/// The parent directory is created if missing. On platforms where rename
/// refuses to replace an existing target, the target is removed first; that
/// removal is the one non-atomic window of the store.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    #[cfg(windows)]
    if path.exists() {
        fs::remove_file(path)?;
    }

    tmp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

/// Load a JSON document, returning `T::default()` when the file is missing or
/// unparseable. A corrupt file is logged as a warning, never an error.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return T::default(),
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("ignoring corrupt state file {}: {err}", path.display());
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        n: u32,
        tag: String,
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let doc = Doc {
            n: 7,
            tag: "x".into(),
        };
        save_json(&path, &doc).unwrap();
        assert_eq!(load_json_or_default::<Doc>(&path), doc);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let doc: Doc = load_json_or_default(&dir.path().join("absent.json"));
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn corrupt_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{not json").unwrap();
        let doc: Doc = load_json_or_default(&path);
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn rewrite_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        save_json(
            &path,
            &Doc {
                n: 1,
                tag: "a".into(),
            },
        )
        .unwrap();
        save_json(
            &path,
            &Doc {
                n: 2,
                tag: "b".into(),
            },
        )
        .unwrap();
        let doc: Doc = load_json_or_default(&path);
        assert_eq!(doc.n, 2);
        // No stray temp files left behind.
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
