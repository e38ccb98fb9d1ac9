//! The blob store proper.

use crate::hash::{sha256_file, HashingWriter};
use cf_common::{is_valid_sha256, Error, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read timeout for artifact downloads. Generous: base images are large.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Content-addressed store rooted at `<home>/blobs`.
pub struct BlobStore {
    root: PathBuf,
    agent: ureq::Agent,
}

impl BlobStore {
    /// Open (and create if needed) the store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(DOWNLOAD_TIMEOUT)
            .build();
        Ok(Self { root, agent })
    }

    /// Final path for a digest, whether or not the blob exists yet.
    pub fn path_of(&self, sha256: &str) -> PathBuf {
        self.root.join(sha256)
    }

    /// True when the final file for a digest is present (content unchecked).
    pub fn contains(&self, sha256: &str) -> bool {
        self.path_of(sha256).is_file()
    }

    /// Ensure a remote artifact is present and verified.
    ///
    /// On a cache hit the existing file is re-hashed before it is trusted;
    /// a corrupted cache entry is discarded and re-downloaded. On download
    /// the bytes stream through a hashing writer into a temp file that is
    /// renamed into place only after the digest matches.
    pub fn ensure(&self, url: &str, expected_sha256: &str, label: &str) -> Result<PathBuf> {
        self.check_digest(expected_sha256)?;
        let final_path = self.path_of(expected_sha256);

        if final_path.is_file() {
            let actual = sha256_file(&final_path)?;
            if actual == expected_sha256 {
                info!(label, sha256 = expected_sha256, "using cached");
                return Ok(final_path);
            }
            warn!(
                label,
                expected = expected_sha256,
                actual = %actual,
                "cached blob failed verification, discarding"
            );
            fs::remove_file(&final_path)?;
        }

        info!(label, url, "downloading");
        let temp = TempBlob::create(&final_path)?;
        let reader = self.open_url(url)?;
        let digest = stream_to(reader, temp.path())?;

        if digest != expected_sha256 {
            // TempBlob's drop removes the partial file.
            return Err(Error::Sha256Mismatch {
                label: label.to_string(),
                expected: expected_sha256.to_string(),
                actual: digest,
            });
        }

        temp.commit(&final_path)?;
        debug!(label, path = %final_path.display(), "blob stored");
        Ok(final_path)
    }

    /// Ensure a local file is adopted into the store under its digest.
    ///
    /// Same contract as [`ensure`](Self::ensure) with the source being a
    /// local path instead of a URL. Used when an embedded archive payload
    /// should also populate the shared cache.
    pub fn ensure_file(&self, source: &Path, expected_sha256: &str, label: &str) -> Result<PathBuf> {
        self.check_digest(expected_sha256)?;
        let final_path = self.path_of(expected_sha256);

        if final_path.is_file() {
            let actual = sha256_file(&final_path)?;
            if actual == expected_sha256 {
                info!(label, sha256 = expected_sha256, "using cached");
                return Ok(final_path);
            }
            fs::remove_file(&final_path)?;
        }

        let temp = TempBlob::create(&final_path)?;
        let reader = File::open(source)?;
        let digest = stream_to(reader, temp.path())?;

        if digest != expected_sha256 {
            return Err(Error::Sha256Mismatch {
                label: label.to_string(),
                expected: expected_sha256.to_string(),
                actual: digest,
            });
        }

        temp.commit(&final_path)?;
        Ok(final_path)
    }

    fn check_digest(&self, digest: &str) -> Result<()> {
        if !is_valid_sha256(digest) {
            return Err(Error::InvalidSpec(format!(
                "expected sha256 must be lowercase 64-hex, got {digest:?}"
            )));
        }
        Ok(())
    }

    /// Open a URL, mapping transport and status failures to error kinds.
    fn open_url(&self, url: &str) -> Result<Box<dyn Read + Send + Sync + 'static>> {
        match self.agent.get(url).call() {
            Ok(resp) => {
                // ureq only returns Ok for 2xx, but the contract is 200 exactly.
                if resp.status() != 200 {
                    return Err(Error::Http {
                        code: resp.status(),
                        url: url.to_string(),
                    });
                }
                Ok(resp.into_reader())
            }
            Err(ureq::Error::Status(code, _)) => Err(Error::Http {
                code,
                url: url.to_string(),
            }),
            Err(ureq::Error::Transport(t)) => Err(Error::Network(t.to_string())),
        }
    }
}

/// Stream a reader into `path`, returning the hex digest of the bytes.
fn stream_to(mut reader: impl Read, path: &Path) -> Result<String> {
    let file = File::create(path)?;
    let mut writer = HashingWriter::new(BufWriter::new(file));
    io::copy(&mut reader, &mut writer).map_err(map_copy_error)?;
    writer.flush()?;
    let (inner, digest) = writer.finalize();
    inner.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    Ok(digest)
}

/// A partial download truncated by the peer surfaces as an I/O error from
/// the body reader; classify it as network rather than local I/O.
fn map_copy_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
            Error::Network(err.to_string())
        }
        _ => Error::Io(err),
    }
}

/// Temp file next to the final blob path, removed on drop unless committed.
struct TempBlob {
    path: PathBuf,
    committed: bool,
}

impl TempBlob {
    fn create(final_path: &Path) -> Result<Self> {
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob");
        let tmp_name = format!("{file_name}.tmp.{:08x}", rand::random::<u32>());
        let path = final_path.with_file_name(tmp_name);
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self, final_path: &Path) -> Result<()> {
        fs::rename(&self.path, final_path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TempBlob {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}
