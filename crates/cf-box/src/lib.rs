//! Clawbox artifact reader and importer.
//!
//! A `.clawbox` file arrives in one of two on-disk shapes, distinguished by
//! the first non-whitespace byte:
//! - `{` — **header-JSON**: the whole file is a spec document, no payload.
//!   Instance identity is derived from the artifact file itself and is
//!   stable across runs.
//! - anything else — **archive**: a gzip-compressed tape archive carrying
//!   `clawspec.json`, optionally an embedded run disk and a `claw/` agent
//!   tree. Identity is minted per run.
//!
//! Both shapes decode into the same canonical [`ClawboxSpec`] intent.

pub mod archive;
pub mod detect;
pub mod header;
pub mod identity;
pub mod spec;

pub use archive::{ArchiveClawbox, ImportOutcome};
pub use detect::{detect_shape, Shape};
pub use header::HeaderClawbox;
pub use identity::{per_run_id, stable_id, ArtifactInode, OsInode};
pub use spec::{ClawboxSpec, GatewayAuthMode, ImageEntry, ImageSource, OpenClawSpec};

use cf_common::{ClawId, Error, Result};
use std::path::Path;

/// A clawbox opened from disk, shape already resolved.
#[derive(Debug)]
pub enum Clawbox {
    Header(HeaderClawbox),
    Archive(ArchiveClawbox),
}

impl Clawbox {
    /// Open and validate a clawbox file of either shape.
    pub fn open(path: &Path) -> Result<Self> {
        match detect_shape(path)? {
            Shape::HeaderJson => Ok(Clawbox::Header(HeaderClawbox::load(path, &OsInode)?)),
            Shape::Archive => Ok(Clawbox::Archive(ArchiveClawbox::load(path)?)),
        }
    }

    pub fn spec(&self) -> &ClawboxSpec {
        match self {
            Clawbox::Header(h) => &h.spec,
            Clawbox::Archive(a) => &a.spec,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Clawbox::Header(_) => Shape::HeaderJson,
            Clawbox::Archive(_) => Shape::Archive,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Clawbox::Header(h) => &h.path,
            Clawbox::Archive(a) => &a.path,
        }
    }

    /// Derive the instance identity for one run of this box.
    ///
    /// Header boxes have a stable identity; archive boxes mint a fresh one,
    /// prefixed by `name_override` when given, else by the spec name.
    pub fn derive_id(&self, name_override: Option<&str>) -> Result<ClawId> {
        match self {
            Clawbox::Header(h) => Ok(h.claw_id.clone()),
            Clawbox::Archive(a) => {
                let prefix = name_override.unwrap_or(&a.spec.name);
                per_run_id(prefix)
            }
        }
    }
}

/// Rewrite the `name` field of a clawbox, writing the result to `output`.
///
/// Header boxes are patched in place as JSON; archive boxes are re-packed
/// entry by entry with a patched `clawspec.json`. Used by `export --name`.
pub fn rewrite_name(input: &Path, output: &Path, new_name: &str) -> Result<()> {
    if !cf_common::is_valid_name(new_name) {
        return Err(Error::InvalidSpec(format!(
            "invalid name {new_name:?}: must match ^[a-z0-9][a-z0-9-]{{2,63}}$"
        )));
    }
    match detect_shape(input)? {
        Shape::HeaderJson => header::rewrite_name(input, output, new_name),
        Shape::Archive => archive::rewrite_name(input, output, new_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::test_fixtures::minimal_spec_json;

    #[test]
    fn open_dispatches_on_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.clawbox");
        std::fs::write(&path, minimal_spec_json("demo-openclaw")).unwrap();

        let opened = Clawbox::open(&path).unwrap();
        assert_eq!(opened.shape(), Shape::HeaderJson);
        assert_eq!(opened.spec().name, "demo-openclaw");
    }

    #[test]
    fn header_identity_is_stable_archive_identity_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.clawbox");
        std::fs::write(&path, minimal_spec_json("demo-openclaw")).unwrap();

        let a = Clawbox::open(&path).unwrap().derive_id(None).unwrap();
        let b = Clawbox::open(&path).unwrap().derive_id(None).unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("demo-openclaw-"));
    }

    #[test]
    fn rewrite_name_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.clawbox");
        std::fs::write(&path, minimal_spec_json("demo-openclaw")).unwrap();

        let err = rewrite_name(&path, &dir.path().join("out.clawbox"), "Bad Name").unwrap_err();
        assert_eq!(err.kind(), "invalid_spec");
    }
}
