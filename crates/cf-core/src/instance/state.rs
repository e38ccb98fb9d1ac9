//! Persisted view state (`state.json`).
//!
//! A display hint, never the source of truth: after a crash `active` may
//! claim an occupant that no longer exists, and the next `run` must not
//! refuse on that basis. The file lock alone judges occupancy.

use super::lock::InstanceLock;
use super::write_json_atomic;
use cf_common::{Error, Result};
use cf_config::instance_files;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of `state.json`. Absent file decodes as the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// Whether a run currently claims this instance (display only).
    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,

    /// Source artifact the instance was created from; survives release so
    /// a later run from a different source is refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// What a run records when it takes the instance.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub instance_id: String,
    pub pid: i64,
    pub source_path: PathBuf,
}

fn state_path(dir: &Path) -> PathBuf {
    dir.join(instance_files::STATE)
}

fn read_state(dir: &Path) -> Result<ViewState> {
    let path = state_path(dir);
    match fs::read_to_string(&path) {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ViewState::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Merge an acquisition into the state under the lock.
///
/// Fails with `source_conflict` when the instance was previously created
/// from a different source path; the identical source reuses the record.
pub fn acquire_while_locked(lock: &InstanceLock, req: &AcquireRequest) -> Result<ViewState> {
    let mut state = read_state(lock.dir())?;

    if let Some(recorded) = &state.source_path {
        if recorded != &req.source_path {
            return Err(Error::SourceConflict {
                id: lock.id().to_string(),
                recorded: recorded.display().to_string(),
                requested: req.source_path.display().to_string(),
            });
        }
    }

    state.active = true;
    state.instance_id = Some(req.instance_id.clone());
    state.pid = Some(req.pid);
    state.source_path = Some(req.source_path.clone());
    state.updated_at = Some(Utc::now());

    write_json_atomic(&state_path(lock.dir()), &state)?;
    Ok(state)
}

/// Clear the occupant, keeping source provenance and the timestamp.
pub fn release_while_locked(lock: &InstanceLock) -> Result<ViewState> {
    let mut state = read_state(lock.dir())?;
    state.active = false;
    state.instance_id = None;
    state.pid = None;
    state.updated_at = Some(Utc::now());
    write_json_atomic(&state_path(lock.dir()), &state)?;
    Ok(state)
}

/// Read-only view; absent file means zero state.
pub fn inspect(instance_dir: &Path) -> Result<ViewState> {
    read_state(instance_dir)
}
