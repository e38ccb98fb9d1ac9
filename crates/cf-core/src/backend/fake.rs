//! Fake backend for tests.
//!
//! Records every start spec, hands out monotonically increasing pids, and
//! tracks running/suspended state in memory. Never spawns a process. The
//! seed ISO "build" writes the documents plus a placeholder ISO file so
//! path assertions hold.

use super::{Accel, StartResult, StartSpec, VmBackend};
use cf_common::{Error, Result};
use cf_config::instance_files;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct FakeState {
    next_pid: i64,
    running: HashMap<i64, bool>, // pid -> suspended?
    started: Vec<StartSpec>,
    stopped: Vec<i64>,
}

/// In-memory stand-in for a hypervisor.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    fail_start: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pid: 50_000,
                ..FakeState::default()
            }),
            fail_start: false,
        }
    }

    /// A backend whose `start` always fails.
    pub fn failing() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            fail_start: true,
        }
    }

    /// Specs passed to `start`, in order.
    pub fn started_specs(&self) -> Vec<StartSpec> {
        self.state.lock().expect("fake state").started.clone()
    }

    /// Pids passed to `stop`, in order.
    pub fn stopped_pids(&self) -> Vec<i64> {
        self.state.lock().expect("fake state").stopped.clone()
    }

    /// Number of `start` invocations.
    pub fn start_count(&self) -> usize {
        self.state.lock().expect("fake state").started.len()
    }

    /// Simulate the guest process dying out from under us.
    pub fn kill_silently(&self, pid: i64) {
        self.state.lock().expect("fake state").running.remove(&pid);
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VmBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn start(&self, spec: &StartSpec) -> Result<StartResult> {
        if self.fail_start {
            return Err(Error::Backend("fake backend told to fail".into()));
        }
        let mut state = self.state.lock().expect("fake state");
        state.next_pid += 1;
        let pid = state.next_pid;
        state.running.insert(pid, false);
        state.started.push(spec.clone());
        Ok(StartResult {
            pid,
            acceleration: Accel::Tcg,
        })
    }

    fn stop(&self, pid: i64) -> Result<()> {
        let mut state = self.state.lock().expect("fake state");
        state.running.remove(&pid);
        state.stopped.push(pid);
        Ok(())
    }

    fn suspend(&self, pid: i64) -> Result<()> {
        let mut state = self.state.lock().expect("fake state");
        match state.running.get_mut(&pid) {
            Some(suspended) => {
                *suspended = true;
                Ok(())
            }
            None => Err(Error::Backend(format!("process {pid} not found"))),
        }
    }

    fn resume(&self, pid: i64) -> Result<()> {
        let mut state = self.state.lock().expect("fake state");
        match state.running.get_mut(&pid) {
            Some(suspended) => {
                *suspended = false;
                Ok(())
            }
            None => Err(Error::Backend(format!("process {pid} not found"))),
        }
    }

    fn is_running(&self, pid: i64) -> bool {
        self.state
            .lock()
            .expect("fake state")
            .running
            .contains_key(&pid)
    }

    fn build_seed_iso(
        &self,
        instance_dir: &Path,
        user_data: &str,
        meta_data: &str,
    ) -> Result<PathBuf> {
        let staging = instance_dir.join("cloud-init");
        fs::create_dir_all(&staging)?;
        fs::write(staging.join("user-data"), user_data)?;
        fs::write(staging.join("meta-data"), meta_data)?;
        let iso = instance_dir.join(instance_files::SEED_ISO);
        fs::write(&iso, b"fake-cidata-iso")?;
        Ok(iso)
    }
}

/// Shared-handle form so tests can keep inspecting the fake after handing
/// the orchestrator its boxed backend.
impl VmBackend for std::sync::Arc<FakeBackend> {
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn start(&self, spec: &StartSpec) -> Result<StartResult> {
        self.as_ref().start(spec)
    }

    fn stop(&self, pid: i64) -> Result<()> {
        self.as_ref().stop(pid)
    }

    fn suspend(&self, pid: i64) -> Result<()> {
        self.as_ref().suspend(pid)
    }

    fn resume(&self, pid: i64) -> Result<()> {
        self.as_ref().resume(pid)
    }

    fn is_running(&self, pid: i64) -> bool {
        self.as_ref().is_running(pid)
    }

    fn build_seed_iso(
        &self,
        instance_dir: &Path,
        user_data: &str,
        meta_data: &str,
    ) -> Result<PathBuf> {
        self.as_ref().build_seed_iso(instance_dir, user_data, meta_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_bookkeeping() {
        let backend = FakeBackend::new();
        assert!(!backend.is_running(1));

        // No spec needed to exercise pid bookkeeping directly.
        let dir = tempfile::tempdir().unwrap();
        let iso = backend
            .build_seed_iso(dir.path(), "#cloud-config\n", "instance-id: x\n")
            .unwrap();
        assert!(iso.is_file());
    }

    #[test]
    fn suspend_resume_track_state() {
        let backend = FakeBackend::new();
        {
            let mut state = backend.state.lock().unwrap();
            state.running.insert(7, false);
        }
        backend.suspend(7).unwrap();
        assert!(backend.is_running(7));
        backend.resume(7).unwrap();
        backend.stop(7).unwrap();
        assert!(!backend.is_running(7));
        assert_eq!(backend.stopped_pids(), vec![7]);
    }
}
