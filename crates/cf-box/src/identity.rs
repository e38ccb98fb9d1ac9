//! CLAWID derivation.
//!
//! Two modes: stable identity hashed from the artifact file's inode number
//! (header-JSON boxes — re-running the same file reuses the instance), and
//! random identity minted per run (archive boxes — many instances may run
//! from one source).

use cf_common::{ClawId, Error, Result};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Hex characters taken from the identity hash / random suffix.
const ID_SUFFIX_LEN: usize = 12;

/// Platform seam for extracting the inode number of an artifact file.
///
/// One implementation per target; tests substitute fixed values.
pub trait ArtifactInode {
    fn inode_of(&self, path: &Path) -> Result<u64>;
}

/// The real filesystem implementation.
pub struct OsInode;

#[cfg(unix)]
impl ArtifactInode for OsInode {
    fn inode_of(&self, path: &Path) -> Result<u64> {
        use std::os::unix::fs::MetadataExt;
        Ok(std::fs::metadata(path)?.ino())
    }
}

#[cfg(not(unix))]
impl ArtifactInode for OsInode {
    fn inode_of(&self, _path: &Path) -> Result<u64> {
        Err(Error::Unsupported(
            "stable artifact identity requires a unix filesystem".into(),
        ))
    }
}

/// Identity-from-artifact: `{name}-{hex(sha256(inode))[..12]}`.
///
/// Stable for the same artifact file; any edit that replaces the inode
/// yields a different identity even for the same `name`.
pub fn stable_id(name: &str, inode: u64) -> Result<ClawId> {
    let mut hasher = Sha256::new();
    hasher.update(inode.to_le_bytes());
    let digest = hasher.finalize();
    let suffix = hex::encode(&digest[..ID_SUFFIX_LEN / 2]);
    ClawId::parse(&format!("{name}-{suffix}"))
}

/// Identity-per-run: `{prefix}-{random 12 hex}`.
pub fn per_run_id(prefix: &str) -> Result<ClawId> {
    let mut bytes = [0u8; ID_SUFFIX_LEN / 2];
    rand::rng().fill(&mut bytes[..]);
    ClawId::parse(&format!("{prefix}-{}", hex::encode(bytes)))
}
