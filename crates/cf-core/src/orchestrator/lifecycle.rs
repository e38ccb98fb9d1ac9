//! `remove`, `suspend`, `resume`.

use super::Orchestrator;
use crate::instance::lock::with_instance_lock;
use cf_common::{ClawId, Error, InstanceStatus, Result};
use std::fs;
use tracing::{info, warn};

impl Orchestrator {
    /// Stop any live process and delete the instance directory.
    pub fn remove(&self, id: &ClawId) -> Result<()> {
        let instance_dir = self.config.instance_dir(id);
        if !instance_dir.is_dir() {
            return Err(Error::not_found(format!("instance {id}")));
        }

        with_instance_lock(&self.config.claws_dir(), id, |guard| {
            match self.store.load(id) {
                Ok(meta) => {
                    if meta.pid > 0 && self.backend.is_running(meta.pid) {
                        info!(id = %id, pid = meta.pid, "stopping backend process");
                        self.backend.stop(meta.pid)?;
                    }
                }
                Err(Error::NotFound { .. }) => {
                    // Directory without a record: a failed create; reclaim it.
                    warn!(id = %id, "removing instance without metadata");
                }
                Err(e) => return Err(e),
            }
            fs::remove_dir_all(guard.dir())?;
            info!(id = %id, "instance removed");
            Ok(())
        })
    }

    /// SIGSTOP the backend process and mark the instance suspended.
    pub fn suspend(&self, id: &ClawId) -> Result<()> {
        with_instance_lock(&self.config.claws_dir(), id, |_guard| {
            let mut meta = self.store.load(id)?;
            if meta.pid <= 0 || !self.backend.is_running(meta.pid) {
                return Err(Error::Backend(format!(
                    "instance {id} has no running process to suspend"
                )));
            }
            self.backend.suspend(meta.pid)?;
            meta.set_status(InstanceStatus::Suspended, None);
            self.store.store(&meta)?;
            info!(id = %id, pid = meta.pid, "suspended");
            Ok(())
        })
    }

    /// SIGCONT the backend process; reconciliation re-probes from here.
    pub fn resume(&self, id: &ClawId) -> Result<()> {
        with_instance_lock(&self.config.claws_dir(), id, |_guard| {
            let mut meta = self.store.load(id)?;
            if meta.status != InstanceStatus::Suspended {
                return Err(Error::Backend(format!(
                    "instance {id} is {} (not suspended)",
                    meta.status
                )));
            }
            self.backend.resume(meta.pid)?;
            meta.set_status(InstanceStatus::Running, None);
            self.store.store(&meta)?;
            info!(id = %id, pid = meta.pid, "resumed");
            Ok(())
        })
    }

    /// Read-only dump of one instance record.
    pub fn show(&self, id: &ClawId) -> Result<crate::instance::InstanceMetadata> {
        self.store.load(id)
    }
}
