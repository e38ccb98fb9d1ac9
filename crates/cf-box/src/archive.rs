//! Archive clawbox shape: gzip-compressed tape archive.
//!
//! The archive carries `clawspec.json` plus optional payloads: an embedded
//! run disk (referenced from the spec as `clawbox:///<path>`) and a `claw/`
//! agent tree. Loading streams the archive once to find and validate the
//! spec; importing streams it again to materialize payloads into the
//! instance directory. Payload extraction never trusts archive paths:
//! absolute paths, `..` components, and link entries are rejected.

use crate::spec::{ClawboxSpec, ImageSource};
use cf_common::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Archive member holding the spec document.
const SPEC_ENTRY: &str = "clawspec.json";

/// Prefix of the embedded agent tree.
const CLAW_PREFIX: &str = "claw/";

/// Imported run disk file name inside the instance directory.
const RUN_DISK: &str = "run.qcow2";

/// Upper bound on the spec entry; anything larger is not a spec.
const SPEC_SIZE_CAP: u64 = 2 * 1024 * 1024;

/// An archive clawbox with its spec already parsed and validated.
#[derive(Debug)]
pub struct ArchiveClawbox {
    pub spec: ClawboxSpec,
    pub path: PathBuf,
}

/// What `import` materialized.
#[derive(Debug)]
pub struct ImportOutcome {
    /// Canonical rewritten spec inside the instance directory.
    pub spec_path: PathBuf,
    /// Extracted run disk, when the spec declared one.
    pub run_disk: Option<PathBuf>,
    /// Number of files extracted under `claw/`.
    pub claw_files: usize,
}

impl ArchiveClawbox {
    /// First pass: locate and validate `clawspec.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut archive = open_archive(path)?;
        for entry in archive.entries().map_err(archive_err)? {
            let mut entry = entry.map_err(archive_err)?;
            let entry_path = entry.path().map_err(archive_err)?.into_owned();
            if entry_path != Path::new(SPEC_ENTRY) {
                continue;
            }
            if entry.size() > SPEC_SIZE_CAP {
                return Err(Error::InvalidSpec(format!(
                    "clawspec.json is {} bytes, cap is {SPEC_SIZE_CAP}",
                    entry.size()
                )));
            }
            let mut json = String::new();
            entry.read_to_string(&mut json)?;
            let spec = ClawboxSpec::from_json(&json)?;
            debug!(name = %spec.name, path = %path.display(), "archive clawbox loaded");
            return Ok(Self {
                spec,
                path: path.to_path_buf(),
            });
        }
        Err(Error::InvalidSpec(format!(
            "{} contains no clawspec.json",
            path.display()
        )))
    }

    /// Path inside the archive of the embedded run disk, if declared.
    fn embedded_disk(&self) -> Option<(String, String)> {
        self.spec.images.iter().find_map(|img| {
            if let ImageSource::Embedded(p) = img.parsed_source() {
                Some((p, img.sha256.clone()))
            } else {
                None
            }
        })
    }

    /// Second pass: materialize payloads into `instance_dir`.
    ///
    /// The embedded run disk streams through a hasher into a temp file and
    /// reaches its final name only after the digest matches. `claw/`
    /// entries are extracted after path sanitization. The spec is rewritten
    /// canonically regardless of how it was indented in the archive.
    pub fn import(&self, instance_dir: &Path) -> Result<ImportOutcome> {
        fs::create_dir_all(instance_dir)?;
        let embedded = self.embedded_disk();
        let mut run_disk = None;
        let mut claw_files = 0usize;

        let mut archive = open_archive(&self.path)?;
        for entry in archive.entries().map_err(archive_err)? {
            let mut entry = entry.map_err(archive_err)?;
            let entry_path = entry.path().map_err(archive_err)?.into_owned();

            if let Some((disk_path, expected_sha)) = &embedded {
                if entry_path == Path::new(disk_path) {
                    let dest = instance_dir.join(RUN_DISK);
                    extract_verified(&mut entry, &dest, expected_sha, disk_path)?;
                    run_disk = Some(dest);
                    continue;
                }
            }

            let Ok(rel) = entry_path.strip_prefix(CLAW_PREFIX.trim_end_matches('/')) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }
            let Some(safe) = sanitize_relative(rel) else {
                warn!(entry = %entry_path.display(), "skipping unsafe archive path");
                continue;
            };
            let dest = instance_dir.join("claw").join(&safe);
            match entry.header().entry_type() {
                tar::EntryType::Directory => {
                    fs::create_dir_all(&dest)?;
                }
                tar::EntryType::Regular => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let mut out = File::create(&dest)?;
                    io::copy(&mut entry, &mut out)?;
                    #[cfg(unix)]
                    if let Ok(mode) = entry.header().mode() {
                        use std::os::unix::fs::PermissionsExt;
                        let _ = fs::set_permissions(&dest, fs::Permissions::from_mode(mode));
                    }
                    claw_files += 1;
                }
                other => {
                    warn!(entry = %entry_path.display(), ?other, "skipping non-regular entry");
                }
            }
        }

        if embedded.is_some() && run_disk.is_none() {
            return Err(Error::InvalidSpec(
                "spec declares an embedded image but the archive has no such entry".into(),
            ));
        }

        let spec_path = instance_dir.join(SPEC_ENTRY);
        fs::write(&spec_path, self.spec.to_canonical_json()?)?;

        Ok(ImportOutcome {
            spec_path,
            run_disk,
            claw_files,
        })
    }
}

/// Re-pack an archive clawbox with a patched `name`, entry by entry.
pub(crate) fn rewrite_name(input: &Path, output: &Path, new_name: &str) -> Result<()> {
    let loaded = ArchiveClawbox::load(input)?;
    let mut spec = loaded.spec;
    spec.name = new_name.to_string();
    spec.validate()?;
    let spec_bytes = spec.to_canonical_json()?.into_bytes();

    let encoder = GzEncoder::new(File::create(output)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut archive = open_archive(input)?;
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let entry_path = entry.path().map_err(archive_err)?.into_owned();
        let mut header = entry.header().clone();
        if entry_path == Path::new(SPEC_ENTRY) {
            header.set_size(spec_bytes.len() as u64);
            header.set_cksum();
            builder
                .append(&header, spec_bytes.as_slice())
                .map_err(Error::Io)?;
        } else {
            builder.append(&header, &mut entry).map_err(Error::Io)?;
        }
    }

    let encoder = builder.into_inner().map_err(Error::Io)?;
    encoder.finish().map_err(Error::Io)?;
    Ok(())
}

fn open_archive(path: &Path) -> Result<tar::Archive<GzDecoder<File>>> {
    let file = File::open(path)?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

/// Gzip/tar decode failures are spec violations, not local I/O faults.
fn archive_err(err: io::Error) -> Error {
    Error::InvalidSpec(format!("corrupt clawbox archive: {err}"))
}

/// Stream an entry into `dest` via a temp sibling, verifying its digest.
fn extract_verified(
    entry: &mut impl Read,
    dest: &Path,
    expected_sha: &str,
    label: &str,
) -> Result<()> {
    let tmp = dest.with_extension("qcow2.tmp");
    let mut out = File::create(&tmp)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(archive_err(e));
            }
        };
        hasher.update(&buf[..n]);
        if let Err(e) = out.write_all(&buf[..n]) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }
    }
    drop(out);

    let actual = hex::encode(hasher.finalize());
    if actual != expected_sha {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Sha256Mismatch {
            label: label.to_string(),
            expected: expected_sha.to_string(),
            actual,
        });
    }
    fs::rename(&tmp, dest)?;
    Ok(())
}

/// Keep only plain relative components; anything else disqualifies the path.
fn sanitize_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
