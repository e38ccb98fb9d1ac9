//! `checkpoint` and `restore`: named copies of the writable disk.
//!
//! The disk is copied while the VM may be live; crash consistency of the
//! checkpoint is the user's responsibility. Suspend first for a clean one.

use super::Orchestrator;
use crate::instance::lock::with_instance_lock;
use cf_common::{is_valid_name, ClawId, Error, Result};
use cf_config::checkpoint_path;
use std::fs;
use tracing::info;

impl Orchestrator {
    /// Copy the boot disk to `checkpoints/<name>.img`.
    pub fn checkpoint(&self, id: &ClawId, name: &str) -> Result<()> {
        check_name(name)?;
        with_instance_lock(&self.config.claws_dir(), id, |guard| {
            let meta = self.store.load(id)?;
            let dest = checkpoint_path(guard.dir(), name);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            copy_via_temp(&meta.disk_path, &dest)?;
            info!(id = %id, name, "checkpoint written");
            Ok(())
        })
    }

    /// Copy a named checkpoint back over the boot disk.
    pub fn restore(&self, id: &ClawId, name: &str) -> Result<()> {
        check_name(name)?;
        with_instance_lock(&self.config.claws_dir(), id, |guard| {
            let meta = self.store.load(id)?;
            let source = checkpoint_path(guard.dir(), name);
            if !source.is_file() {
                return Err(Error::not_found(format!(
                    "checkpoint {name:?} of instance {id}"
                )));
            }
            copy_via_temp(&source, &meta.disk_path)?;
            info!(id = %id, name, "checkpoint restored");
            Ok(())
        })
    }
}

fn check_name(name: &str) -> Result<()> {
    if !is_valid_name(name) {
        return Err(Error::InvalidSpec(format!(
            "checkpoint name {name:?} must match ^[a-z0-9][a-z0-9-]{{2,63}}$"
        )));
    }
    Ok(())
}

fn copy_via_temp(src: &std::path::Path, dest: &std::path::Path) -> Result<()> {
    let tmp = dest.with_extension("img.tmp");
    if let Err(e) = fs::copy(src, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
