//! Instance metadata records (`instance.json`).

use super::write_json_atomic;
use cf_common::{ClawId, Error, InstanceStatus, PortMapping, Result};
use cf_config::instance_files;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Canonical per-instance record.
///
/// Created by the orchestrator at start; mutated only while the instance
/// lock is held; reconciled on every listing; removed with the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMetadata {
    pub id: ClawId,
    pub image_ref: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,

    pub state_path: PathBuf,
    pub gateway_port: u16,
    pub published_ports: Vec<PortMapping>,
    pub status: InstanceStatus,

    /// Backend implementation name (`qemu`, `fake`).
    pub backend: String,

    /// Backend process id; zero or negative when no process was started.
    pub pid: i64,

    pub disk_path: PathBuf,
    pub seed_iso_path: PathBuf,
    pub serial_log_path: PathBuf,
    pub vm_log_path: PathBuf,
    pub monitor_path: PathBuf,

    /// `kvm`, `hvf`, or `tcg`.
    pub acceleration_kind: String,

    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// The clawbox file this instance was started from, when any.
    /// Export provenance: absent for ref-only runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_clawbox: Option<PathBuf>,
}

impl InstanceMetadata {
    /// Update status (and optionally the error note), bumping `updated_at`.
    pub fn set_status(&mut self, status: InstanceStatus, last_error: Option<String>) {
        self.status = status;
        self.last_error = last_error;
        self.updated_at_utc = Utc::now();
    }
}

/// Load/store layer over the claws directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    claws_dir: PathBuf,
}

impl MetadataStore {
    pub fn new(claws_dir: impl Into<PathBuf>) -> Self {
        Self {
            claws_dir: claws_dir.into(),
        }
    }

    fn metadata_path(&self, id: &ClawId) -> PathBuf {
        self.claws_dir.join(id.as_str()).join(instance_files::METADATA)
    }

    /// Persist atomically (write temp, rename).
    pub fn store(&self, meta: &InstanceMetadata) -> Result<()> {
        write_json_atomic(&self.metadata_path(&meta.id), meta)
    }

    /// Load one record; `not_found` when the instance has no metadata.
    pub fn load(&self, id: &ClawId) -> Result<InstanceMetadata> {
        let path = self.metadata_path(id);
        match fs::read_to_string(&path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("instance {id}")))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// All instances with readable metadata, sorted by id.
    ///
    /// Directories without a record (mid-create, or leftovers from a
    /// failed run) are skipped with a warning rather than failing the
    /// whole listing.
    pub fn list(&self) -> Result<Vec<InstanceMetadata>> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.claws_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join(instance_files::METADATA);
            match fs::read_to_string(&meta_path) {
                Ok(json) => match serde_json::from_str::<InstanceMetadata>(&json) {
                    Ok(meta) => out.push(meta),
                    Err(e) => {
                        warn!(path = %meta_path.display(), error = %e, "unreadable instance metadata, skipping")
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %meta_path.display(), error = %e, "unreadable instance metadata, skipping")
                }
            }
        }
        out.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> InstanceMetadata {
        let dir = PathBuf::from(format!("/home/claws/{id}"));
        InstanceMetadata {
            id: ClawId::parse(id).unwrap(),
            image_ref: "ubuntu-24.04".into(),
            workspace_path: None,
            state_path: dir.join("state"),
            gateway_port: 8090,
            published_ports: vec![PortMapping::new(8090, 8080)],
            status: InstanceStatus::Booting,
            backend: "qemu".into(),
            pid: 1234,
            disk_path: dir.join("instance.img"),
            seed_iso_path: dir.join("seed.iso"),
            serial_log_path: dir.join("serial.log"),
            vm_log_path: dir.join("vm.log"),
            monitor_path: dir.join("qemu-monitor.sock"),
            acceleration_kind: "tcg".into(),
            created_at_utc: Utc::now(),
            updated_at_utc: Utc::now(),
            last_error: None,
            source_clawbox: None,
        }
    }

    #[test]
    fn store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let meta = sample("demo-abc");
        fs::create_dir_all(dir.path().join("demo-abc")).unwrap();

        store.store(&meta).unwrap();
        let loaded = store.load(&meta.id).unwrap();
        assert_eq!(loaded.id, meta.id);
        assert_eq!(loaded.gateway_port, 8090);
        assert_eq!(loaded.status, InstanceStatus::Booting);
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let err = store.load(&ClawId::parse("demo-abc").unwrap()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn list_skips_recordless_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        for id in ["demo-bbb", "demo-aaa"] {
            let meta = sample(id);
            fs::create_dir_all(dir.path().join(id)).unwrap();
            store.store(&meta).unwrap();
        }
        // A directory mid-create has no instance.json yet.
        fs::create_dir_all(dir.path().join("demo-ccc")).unwrap();
        // Garbage metadata is skipped, not fatal.
        fs::create_dir_all(dir.path().join("demo-ddd")).unwrap();
        fs::write(
            dir.path().join("demo-ddd").join(instance_files::METADATA),
            "not json",
        )
        .unwrap();

        let listed = store.list().unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["demo-aaa", "demo-bbb"]);
    }

    #[test]
    fn list_of_missing_claws_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn set_status_bumps_timestamp() {
        let mut meta = sample("demo-abc");
        let before = meta.updated_at_utc;
        std::thread::sleep(std::time::Duration::from_millis(5));
        meta.set_status(InstanceStatus::Ready, None);
        assert_eq!(meta.status, InstanceStatus::Ready);
        assert!(meta.updated_at_utc > before);
    }
}
