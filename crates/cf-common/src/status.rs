//! Instance lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable state of one instance, persisted in `instance.json`.
///
/// `booting` and `running` are claims made at start time; `ready`,
/// `unhealthy`, and `exited` are verdicts of reconciliation against the
/// live process and the gateway probe. `suspended` is set only by the
/// suspend operation and is never overwritten by probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Booting,
    Running,
    Ready,
    Suspended,
    Unhealthy,
    Exited,
}

impl InstanceStatus {
    /// True for states where the backend process is expected to be alive.
    pub fn expects_process(self) -> bool {
        !matches!(self, InstanceStatus::Exited)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Booting => "booting",
            InstanceStatus::Running => "running",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Unhealthy => "unhealthy",
            InstanceStatus::Exited => "exited",
        };
        write!(f, "{s}")
    }
}
