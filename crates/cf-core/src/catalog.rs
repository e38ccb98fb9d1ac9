//! Image catalog: registry-style refs to downloadable base images.
//!
//! A ref like `ubuntu-24.04` names a pinned `{url, sha256, arch}` triple.
//! Resolution feeds the blob store; reuse of an already-present base is
//! reported so scripted callers can assert cache behaviour.

use crate::backend::Arch;
use cf_blob::BlobStore;
use cf_common::{Error, Result};
use std::path::PathBuf;
use tracing::info;

/// One pinned catalog image.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub ref_name: String,
    pub url: String,
    pub sha256: String,
    pub arch: Arch,
}

/// The ref → image table.
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    entries: Vec<CatalogEntry>,
}

impl ImageCatalog {
    /// The built-in table of supported cloud images.
    pub fn builtin() -> Self {
        let entries = vec![
            CatalogEntry {
                ref_name: "ubuntu-24.04".into(),
                url: "https://cloud-images.ubuntu.com/noble/current/noble-server-cloudimg-amd64.img"
                    .into(),
                sha256: "32a9d30d18803da72f5936cf2b7b9efcb4d0bb63c67933f17e3bdfd1751da3f3"
                    .into(),
                arch: Arch::Amd64,
            },
            CatalogEntry {
                ref_name: "ubuntu-24.04-arm64".into(),
                url: "https://cloud-images.ubuntu.com/noble/current/noble-server-cloudimg-arm64.img"
                    .into(),
                sha256: "c3a1c18b0a40a99e660a3398c0d808b9e6a965e28d2153cdbbcbb2b2b4d30d5f"
                    .into(),
                arch: Arch::Arm64,
            },
            CatalogEntry {
                ref_name: "debian-12".into(),
                url: "https://cloud.debian.org/images/cloud/bookworm/latest/debian-12-genericcloud-amd64.qcow2"
                    .into(),
                sha256: "6a0a4d840e5cf1e67800de27c124ebd4b2f603dfe0e2c6b8ba579b1a6a5ee98e"
                    .into(),
                arch: Arch::Amd64,
            },
        ];
        Self { entries }
    }

    /// A catalog with explicit entries (tests, private mirrors).
    pub fn with_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Look up a ref.
    pub fn lookup(&self, ref_name: &str) -> Result<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.ref_name == ref_name)
            .ok_or_else(|| Error::not_found(format!("image ref {ref_name:?}")))
    }

    /// Resolve a ref to a verified local file via the blob store.
    ///
    /// Emits "using cached base" when the blob was already present.
    pub fn resolve(&self, blobs: &BlobStore, ref_name: &str) -> Result<(PathBuf, &CatalogEntry)> {
        let entry = self.lookup(ref_name)?;
        let cached = blobs.contains(&entry.sha256);
        let path = blobs.ensure(&entry.url, &entry.sha256, ref_name)?;
        if cached {
            info!(image = %ref_name, "using cached base");
        }
        Ok((path, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_blob::sha256_hex;

    #[test]
    fn builtin_refs_resolve() {
        let catalog = ImageCatalog::builtin();
        let entry = catalog.lookup("ubuntu-24.04").unwrap();
        assert_eq!(entry.arch, Arch::Amd64);
        assert!(entry.url.starts_with("https://"));
        assert_eq!(entry.sha256.len(), 64);
    }

    #[test]
    fn unknown_ref_is_not_found() {
        let catalog = ImageCatalog::builtin();
        let err = catalog.lookup("ubuntu-99.99").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn resolve_uses_cached_blob() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::open(dir.path()).unwrap();
        let body = b"pretend cloud image";
        let digest = sha256_hex(body);
        std::fs::write(dir.path().join(&digest), body).unwrap();

        let catalog = ImageCatalog::with_entries(vec![CatalogEntry {
            ref_name: "test-image".into(),
            // Unroutable: resolution must come from the cache.
            url: "http://127.0.0.1:1/img".into(),
            sha256: digest.clone(),
            arch: Arch::Amd64,
        }]);

        let (path, entry) = catalog.resolve(&blobs, "test-image").unwrap();
        assert_eq!(path, dir.path().join(&digest));
        assert_eq!(entry.ref_name, "test-image");
    }
}
