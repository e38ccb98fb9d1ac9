//! Header-JSON clawbox shape.

use crate::identity::{stable_id, ArtifactInode};
use crate::spec::ClawboxSpec;
use cf_common::{ClawId, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A header-JSON clawbox: the file is the spec, identity is stable.
#[derive(Debug)]
pub struct HeaderClawbox {
    pub spec: ClawboxSpec,
    pub claw_id: ClawId,
    pub path: PathBuf,
}

impl HeaderClawbox {
    /// Load, strictly decode, validate, and derive the stable identity.
    pub fn load(path: &Path, inode: &dyn ArtifactInode) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let spec = ClawboxSpec::from_json(&json)?;
        let claw_id = stable_id(&spec.name, inode.inode_of(path)?)?;
        debug!(id = %claw_id, path = %path.display(), "header clawbox loaded");
        Ok(Self {
            spec,
            claw_id,
            path: path.to_path_buf(),
        })
    }
}

/// Patch the `name` field of a header-JSON box into `output`.
pub(crate) fn rewrite_name(input: &Path, output: &Path, new_name: &str) -> Result<()> {
    let json = fs::read_to_string(input)?;
    let mut spec = ClawboxSpec::from_json(&json)?;
    spec.name = new_name.to_string();
    spec.validate()
        .map_err(|e| Error::InvalidSpec(format!("after name rewrite: {e}")))?;
    fs::write(output, spec.to_canonical_json()?)?;
    Ok(())
}
