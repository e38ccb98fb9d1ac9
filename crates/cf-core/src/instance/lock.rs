//! Per-instance advisory file lock.
//!
//! One `instance.flock` per CLAWID, acquired non-blocking. Contention is a
//! normal outcome (`busy`), not a wait. The lock lives for the duration of
//! a closure so release cannot be forgotten on error paths, and a crashed
//! holder releases implicitly when its descriptor dies.

use cf_common::{ClawId, Error, Result};
use cf_config::instance_files;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Witness that the per-instance lock is held.
///
/// Functions that must only run under the lock take `&InstanceLock`, which
/// makes "caller already holds the lock" a compile-time fact instead of a
/// comment.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    id: ClawId,
    dir: PathBuf,
}

impl InstanceLock {
    pub fn id(&self) -> &ClawId {
        &self.id
    }

    /// The instance directory this lock guards.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        trace!(id = %self.id, "instance lock released");
    }
}

/// Run `f` while holding the exclusive lock for `id`.
///
/// Creates the instance directory tree on first use. Returns `busy` when
/// another process (or another caller in this process) holds the lock.
/// The lock is released when `f` returns, on success and failure alike.
pub fn with_instance_lock<T>(
    claws_dir: &Path,
    id: &ClawId,
    f: impl FnOnce(&InstanceLock) -> Result<T>,
) -> Result<T> {
    let guard = try_acquire(claws_dir, id)?;
    f(&guard)
}

/// Acquire without a closure; the guard releases on drop.
///
/// Prefer [`with_instance_lock`]; this exists for flows that hand the
/// guard across helper boundaries.
pub fn try_acquire(claws_dir: &Path, id: &ClawId) -> Result<InstanceLock> {
    let dir = claws_dir.join(id.as_str());
    fs::create_dir_all(&dir)?;
    let lock_path = dir.join(instance_files::LOCK);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            debug!(id = %id, "instance lock acquired");
            Ok(InstanceLock {
                file,
                id: id.clone(),
                dir,
            })
        }
        Err(e) if is_contention(&e) => Err(Error::Busy { id: id.to_string() }),
        Err(e) => Err(Error::Io(e)),
    }
}

fn is_contention(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ClawId {
        ClawId::parse(s).unwrap()
    }

    #[test]
    fn lock_creates_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let claws = dir.path().join("claws");
        with_instance_lock(&claws, &id("demo-abc"), |guard| {
            assert!(guard.dir().is_dir());
            assert!(guard.dir().join(instance_files::LOCK).is_file());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn second_holder_gets_busy() {
        let dir = tempfile::tempdir().unwrap();
        let claws = dir.path().join("claws");
        let the_id = id("demo-abc");

        let outer = try_acquire(&claws, &the_id).unwrap();
        let err = try_acquire(&claws, &the_id).unwrap_err();
        assert_eq!(err.kind(), "busy");
        drop(outer);

        // Released: the next acquisition succeeds.
        assert!(try_acquire(&claws, &the_id).is_ok());
    }

    #[test]
    fn different_ids_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let claws = dir.path().join("claws");

        let _a = try_acquire(&claws, &id("demo-aaa")).unwrap();
        let _b = try_acquire(&claws, &id("demo-bbb")).unwrap();
    }

    #[test]
    fn lock_released_when_closure_fails() {
        let dir = tempfile::tempdir().unwrap();
        let claws = dir.path().join("claws");
        let the_id = id("demo-abc");

        let result: Result<()> = with_instance_lock(&claws, &the_id, |_| {
            Err(Error::Backend("boom".into()))
        });
        assert!(result.is_err());

        // Failure released the lock.
        assert!(try_acquire(&claws, &the_id).is_ok());
    }

    #[test]
    fn concurrent_threads_one_wins() {
        let dir = tempfile::tempdir().unwrap();
        let claws = dir.path().join("claws");
        let the_id = id("demo-abc");

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let barrier = barrier.clone();
                    let claws = claws.clone();
                    let the_id = the_id.clone();
                    scope.spawn(move || {
                        barrier.wait();
                        with_instance_lock(&claws, &the_id, |_| {
                            std::thread::sleep(std::time::Duration::from_millis(400));
                            Ok(())
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Busy { .. })))
            .count();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!((ok, busy), (1, 1), "exactly one winner expected");
    }
}
