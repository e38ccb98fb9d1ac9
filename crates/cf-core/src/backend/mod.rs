//! VM backend boundary.
//!
//! The orchestrator talks to exactly one backend through this trait,
//! injected at construction. Production uses [`qemu::QemuBackend`]; tests
//! substitute [`fake::FakeBackend`]. No open polymorphism beyond this seam.

pub mod ports;
pub mod qemu;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

use cf_common::{ClawId, Error, PortMapping, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Guest image architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl std::str::FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "amd64" | "x86_64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => Err(Error::Unsupported(format!("architecture {other:?}"))),
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arch::Amd64 => write!(f, "amd64"),
            Arch::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Hardware acceleration the backend ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accel {
    Kvm,
    Hvf,
    Tcg,
}

impl Accel {
    pub fn as_str(self) -> &'static str {
        match self {
            Accel::Kvm => "kvm",
            Accel::Hvf => "hvf",
            Accel::Tcg => "tcg",
        }
    }
}

/// A named volume shared into the guest over 9p.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// User-chosen volume name.
    pub name: String,
    /// Bind-mount root on the host (`<instance_dir>/volumes/<name>`).
    pub host_path: PathBuf,
    /// Absolute mount point inside the guest.
    pub guest_path: String,
}

/// Everything a backend needs to start one instance.
#[derive(Debug, Clone)]
pub struct StartSpec {
    pub id: ClawId,
    pub instance_dir: PathBuf,
    pub arch: Arch,
    /// Boot disk (`instance.img`, or `run.qcow2` for archive imports).
    pub disk_path: PathBuf,
    pub workspace_path: Option<PathBuf>,
    pub state_path: PathBuf,
    pub claw_path: Option<PathBuf>,
    /// Gateway forward; always first in `published_ports` too.
    pub gateway: PortMapping,
    /// Normalized forwards, gateway included first.
    pub published_ports: Vec<PortMapping>,
    pub cpus: u32,
    pub memory_mib: u32,
    /// Package spec installed in the guest when OpenClaw is absent.
    pub openclaw_package: String,
    pub openclaw_config_json: String,
    pub openclaw_env: BTreeMap<String, String>,
    pub provision_scripts: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub ssh_authorized_keys: Vec<String>,
}

/// Outcome of a successful start.
#[derive(Debug, Clone, Copy)]
pub struct StartResult {
    pub pid: i64,
    pub acceleration: Accel,
}

/// The pluggable VM backend contract.
pub trait VmBackend {
    /// Implementation name recorded in instance metadata.
    fn name(&self) -> &'static str;

    /// Launch the VM; the process outlives this call.
    fn start(&self, spec: &StartSpec) -> Result<StartResult>;

    /// SIGTERM, then SIGKILL after the grace period.
    fn stop(&self, pid: i64) -> Result<()>;

    /// SIGSTOP semantics.
    fn suspend(&self, pid: i64) -> Result<()>;

    /// SIGCONT semantics.
    fn resume(&self, pid: i64) -> Result<()>;

    fn is_running(&self, pid: i64) -> bool;

    /// Pack cloud-init documents into a `cidata`-labelled ISO.
    fn build_seed_iso(&self, instance_dir: &Path, user_data: &str, meta_data: &str)
        -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_parses_common_spellings() {
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::Amd64);
        assert_eq!("x86_64".parse::<Arch>().unwrap(), Arch::Amd64);
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert!("riscv64".parse::<Arch>().is_err());
    }

    #[test]
    fn accel_labels() {
        assert_eq!(Accel::Kvm.as_str(), "kvm");
        assert_eq!(Accel::Tcg.as_str(), "tcg");
    }
}
