//! Per-instance locking, view state, and metadata records.
//!
//! The advisory file lock is the sole occupancy judge for an instance.
//! Everything persisted beside it (`state.json`, `instance.json`) is a
//! view: helpful for listing and diagnosis, never consulted to decide
//! whether an operation may proceed.

pub mod lock;
pub mod metadata;
pub mod state;

pub use lock::{with_instance_lock, InstanceLock};
pub use metadata::{InstanceMetadata, MetadataStore};
pub use state::{acquire_while_locked, inspect, release_while_locked, AcquireRequest, ViewState};

use cf_common::Result;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Rewrite a JSON file atomically: write a temp sibling, then rename.
///
/// Readers racing with the writer observe either the old document or the
/// new one, never a torn file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["v"], 2);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }
}
