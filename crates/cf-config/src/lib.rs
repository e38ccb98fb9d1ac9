//! Configuration resolution and path discovery.
//!
//! Resolution order: environment variables → derived defaults. The result
//! is a plain `Config` value resolved once at startup and threaded through
//! every component; nothing in the runtime reads the environment after
//! construction.

use cf_common::ClawId;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Environment variable names.
const ENV_HOME: &str = "CLAWFARM_HOME";
const ENV_CACHE_DIR: &str = "CLAWFARM_CACHE_DIR";
const ENV_DATA_DIR: &str = "CLAWFARM_DATA_DIR";

/// Directory name under the user home when no override is set.
const DEFAULT_HOME_NAME: &str = ".clawfarm";

/// Where a directory value came from, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirSource {
    /// Set via environment variable.
    Environment,
    /// Derived from the user home directory.
    #[default]
    Derived,
}

impl std::fmt::Display for DirSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirSource::Environment => write!(f, "environment variable"),
            DirSource::Derived => write!(f, "derived default"),
        }
    }
}

/// Resolved clawfarm directories.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Root of all clawfarm state (`blobs/`, `claws/`).
    pub home: PathBuf,
    /// Cache directory (defaults to `<home>/cache`).
    pub cache_dir: PathBuf,
    /// Data directory (defaults to `<home>`).
    pub data_dir: PathBuf,
    /// Provenance of the home value.
    pub home_source: DirSource,
}

impl Config {
    /// Resolve from the process environment.
    ///
    /// Falls back to `<user-home>/.clawfarm` when `CLAWFARM_HOME` is unset;
    /// when the user home itself cannot be determined the current directory
    /// is used, which keeps tests and containers working.
    pub fn from_env() -> Self {
        let (home, home_source) = match std::env::var_os(ENV_HOME) {
            Some(v) if !v.is_empty() => (PathBuf::from(v), DirSource::Environment),
            _ => {
                let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                (base.join(DEFAULT_HOME_NAME), DirSource::Derived)
            }
        };

        let cache_dir = match std::env::var_os(ENV_CACHE_DIR) {
            Some(v) if !v.is_empty() => PathBuf::from(v),
            _ => home.join("cache"),
        };

        let data_dir = match std::env::var_os(ENV_DATA_DIR) {
            Some(v) if !v.is_empty() => PathBuf::from(v),
            _ => home.clone(),
        };

        Config {
            home,
            cache_dir,
            data_dir,
            home_source,
        }
    }

    /// Construct a config rooted at an explicit directory (tests, embedding).
    pub fn rooted_at(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Config {
            cache_dir: home.join("cache"),
            data_dir: home.clone(),
            home,
            home_source: DirSource::Environment,
        }
    }

    /// Content-addressed blob directory.
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Parent directory of all instance directories.
    pub fn claws_dir(&self) -> PathBuf {
        self.data_dir.join("claws")
    }

    /// Directory of one instance.
    pub fn instance_dir(&self, id: &ClawId) -> PathBuf {
        self.claws_dir().join(id.as_str())
    }
}

/// Well-known file names inside an instance directory.
pub mod instance_files {
    pub const LOCK: &str = "instance.flock";
    pub const STATE: &str = "state.json";
    pub const METADATA: &str = "instance.json";
    pub const DISK: &str = "instance.img";
    pub const RUN_DISK: &str = "run.qcow2";
    pub const SPEC: &str = "clawspec.json";
    pub const SEED_ISO: &str = "seed.iso";
    pub const SERIAL_LOG: &str = "serial.log";
    pub const VM_LOG: &str = "vm.log";
    pub const QEMU_PID: &str = "qemu.pid";
    pub const MONITOR_SOCK: &str = "qemu-monitor.sock";
    pub const CLAW_TREE: &str = "claw";
    pub const CHECKPOINTS: &str = "checkpoints";
    pub const VOLUMES: &str = "volumes";
}

/// Join a checkpoint name into its image path.
pub fn checkpoint_path(instance_dir: &Path, name: &str) -> PathBuf {
    instance_dir
        .join(instance_files::CHECKPOINTS)
        .join(format!("{name}.img"))
}
