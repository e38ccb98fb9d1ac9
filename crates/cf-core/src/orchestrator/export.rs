//! `export`: ship an instance's source clawbox, secrets checked first.

use super::Orchestrator;
use crate::instance::lock::with_instance_lock;
use cf_common::{ClawId, Error, Result};
use cf_scan::SecretScanner;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

impl Orchestrator {
    /// Copy the instance's source clawbox to `output`.
    ///
    /// Refuses instances that were not started from a clawbox file. The
    /// source bytes are scanned before anything is written, so a refused
    /// export leaves no output file at all. A `name_override` re-packs the
    /// box with a patched `name` field.
    pub fn export(
        &self,
        id: &ClawId,
        output: &Path,
        name_override: Option<&str>,
        allow_secrets: bool,
    ) -> Result<()> {
        with_instance_lock(&self.config.claws_dir(), id, |_guard| {
            let meta = self.store.load(id)?;
            let Some(source) = &meta.source_clawbox else {
                return Err(Error::NotClawboxBacked { id: id.to_string() });
            };

            let bytes = fs::read(source)?;
            let findings = SecretScanner::new().scan(&bytes);
            if !findings.is_empty() {
                if !allow_secrets {
                    return Err(Error::SecretDetected {
                        count: findings.len(),
                        first: findings[0].kind.label().to_string(),
                    });
                }
                warn!(
                    id = %id,
                    findings = findings.len(),
                    "exporting despite detected secrets (--allow-secrets)"
                );
            }

            match name_override {
                Some(new_name) => cf_box::rewrite_name(source, output, new_name)?,
                None => {
                    if let Err(e) = fs::copy(source, output) {
                        let _ = fs::remove_file(output);
                        return Err(e.into());
                    }
                }
            }
            info!(id = %id, output = %output.display(), "exported");
            Ok(())
        })
    }
}
