//! `ps` and status reconciliation.
//!
//! Reconciliation is a pure function of observed facts (process liveness,
//! probe outcome) applied to each persisted record during listing. The
//! probe runs only for live, non-suspended instances, with a tight
//! timeout so `ps` stays fast even with unhealthy guests.

use super::{Orchestrator, ProbeOutcome, PS_PROBE_TIMEOUT};
use crate::instance::InstanceMetadata;
use cf_common::{InstanceStatus, Result};
use tracing::debug;

impl Orchestrator {
    /// List every instance, reconciling each record against reality.
    ///
    /// Changed records are persisted best-effort; a write failure on one
    /// instance does not abort the listing.
    pub fn ps(&self) -> Result<Vec<InstanceMetadata>> {
        let mut listed = self.store.list()?;
        for meta in &mut listed {
            let running = meta.pid > 0 && self.backend.is_running(meta.pid);
            let probe = if running && meta.status != InstanceStatus::Suspended {
                Some(self.probe.probe(meta.gateway_port, PS_PROBE_TIMEOUT))
            } else {
                None
            };

            let (status, last_error) = reconcile_status(meta.status, running, probe.as_ref());
            if status != meta.status || last_error != meta.last_error {
                debug!(id = %meta.id, from = %meta.status, to = %status, "reconciled");
                meta.set_status(status, last_error);
                if let Err(e) = self.store.store(meta) {
                    debug!(id = %meta.id, error = %e, "could not persist reconciled status");
                }
            }
        }
        Ok(listed)
    }
}

/// Pure reconciliation: bring a persisted status into agreement with the
/// observed process and gateway state.
pub fn reconcile_status(
    current: InstanceStatus,
    running: bool,
    probe: Option<&ProbeOutcome>,
) -> (InstanceStatus, Option<String>) {
    if !running {
        return (InstanceStatus::Exited, None);
    }
    if current == InstanceStatus::Suspended {
        // Probes never overwrite an intentional suspension.
        return (InstanceStatus::Suspended, None);
    }
    match probe {
        Some(ProbeOutcome::Healthy(_)) => (InstanceStatus::Ready, None),
        Some(ProbeOutcome::ServerError(code)) => (
            InstanceStatus::Unhealthy,
            Some(format!("gateway returned http {code}")),
        ),
        Some(ProbeOutcome::Down(reason)) => (
            InstanceStatus::Unhealthy,
            Some(format!("gateway unreachable: {reason}")),
        ),
        None => (current, None),
    }
}
