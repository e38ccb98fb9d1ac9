//! The `run` flow: resolve → identity → lock → preflight → stage →
//! cloud-init → start → persist → readiness.

use super::{
    Orchestrator, ProbeOutcome, RunRequest, DEFAULT_OPENCLAW_PACKAGE, GATEWAY_GUEST_PORT,
    READY_POLL_INTERVAL, READY_PROBE_TIMEOUT,
};
use crate::backend::ports::normalize_port_forwards;
use crate::backend::{Arch, StartSpec, VolumeMount};
use crate::cloudinit::{render_meta_data, render_user_data, CloudInitInput};
use crate::instance::lock::{with_instance_lock, InstanceLock};
use crate::instance::state::{acquire_while_locked, release_while_locked, AcquireRequest};
use crate::instance::InstanceMetadata;
use crate::preflight;
use cf_box::{per_run_id, Clawbox, ClawboxSpec, ImageSource, OpenClawSpec};
use cf_common::{ClawId, Error, InstanceStatus, PortMapping, Result};
use cf_config::instance_files;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// What `run` reports back to the CLI.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub id: ClawId,
    pub status: InstanceStatus,
    pub pid: i64,
    pub gateway: PortMapping,
    pub serial_log_path: PathBuf,
}

/// Resolved run input.
enum RunTarget {
    Box(Clawbox),
    Ref(String),
}

impl Orchestrator {
    /// End-to-end `run`. The per-instance lock is held for the whole flow
    /// and released on every exit path.
    pub fn run(&self, req: &RunRequest) -> Result<RunOutcome> {
        let target = resolve_target(&req.input)?;
        let (id, source_path) = match &target {
            RunTarget::Box(clawbox) => (
                clawbox.derive_id(req.name_override.as_deref())?,
                clawbox.path().to_path_buf(),
            ),
            RunTarget::Ref(ref_name) => {
                let prefix = req
                    .name_override
                    .clone()
                    .unwrap_or_else(|| sanitize_ref_prefix(ref_name));
                (per_run_id(&prefix)?, PathBuf::from(ref_name))
            }
        };

        info!(id = %id, input = %req.input, "run starting");
        with_instance_lock(&self.config.claws_dir(), &id, |guard| {
            self.run_locked(guard, &id, &target, req, &source_path)
        })
    }

    fn run_locked(
        &self,
        guard: &InstanceLock,
        id: &ClawId,
        target: &RunTarget,
        req: &RunRequest,
        source_path: &Path,
    ) -> Result<RunOutcome> {
        let result = self.start_instance(guard, id, target, req, source_path);
        if let Err(err) = &result {
            // The view-state claim is display only; clear it unless the VM
            // was deliberately left running for inspection.
            if !matches!(err, Error::Unreachable { .. }) {
                let _ = release_while_locked(guard);
            }
        }
        result
    }

    fn start_instance(
        &self,
        guard: &InstanceLock,
        id: &ClawId,
        target: &RunTarget,
        req: &RunRequest,
        source_path: &Path,
    ) -> Result<RunOutcome> {
        let instance_dir = guard.dir().to_path_buf();

        // Fail-fast: every credential resolved before any long operation.
        let default_openclaw = OpenClawSpec::default();
        let spec_openclaw = match target {
            RunTarget::Box(clawbox) => &clawbox.spec().openclaw,
            RunTarget::Ref(_) => &default_openclaw,
        };
        let resolved = preflight::resolve(spec_openclaw, &req.credentials, self.input.as_deref())?;

        acquire_while_locked(
            guard,
            &AcquireRequest {
                instance_id: id.to_string(),
                pid: 0,
                source_path: source_path.to_path_buf(),
            },
        )?;

        let staged = self.stage_artifact(&instance_dir, target)?;

        let state_dir = instance_dir.join("state");
        fs::create_dir_all(&state_dir)?;
        if let Some(workspace) = &req.workspace {
            fs::create_dir_all(workspace)?;
        }
        let claw_dir = instance_dir.join(instance_files::CLAW_TREE);
        let claw_path = claw_dir.is_dir().then_some(claw_dir);

        let mut volume_mounts = Vec::with_capacity(req.volumes.len());
        for (name, guest_path) in &req.volumes {
            let host_path = instance_dir.join(instance_files::VOLUMES).join(name);
            fs::create_dir_all(&host_path)?;
            volume_mounts.push(VolumeMount {
                name: name.clone(),
                host_path,
                guest_path: guest_path.clone(),
            });
        }

        let gateway = PortMapping::new(req.gateway_port, GATEWAY_GUEST_PORT);
        let published_ports = normalize_port_forwards(gateway, &req.publish)?;

        let mut provision_scripts = match target {
            RunTarget::Box(clawbox) => clawbox.spec().provision.clone(),
            RunTarget::Ref(_) => Vec::new(),
        };
        provision_scripts.extend(req.run_commands.iter().cloned());

        let volume_guest_paths: Vec<String> =
            req.volumes.iter().map(|(_, guest)| guest.clone()).collect();
        let cloud_init = CloudInitInput {
            instance_id: id.as_str(),
            gateway_guest_port: GATEWAY_GUEST_PORT,
            openclaw_package: DEFAULT_OPENCLAW_PACKAGE,
            openclaw_config_json: &resolved.config_json,
            openclaw_env: &resolved.env,
            ssh_authorized_keys: &req.ssh_authorized_keys,
            volume_guest_paths: &volume_guest_paths,
            provision_scripts: &provision_scripts,
        };
        let user_data = render_user_data(&cloud_init);
        let meta_data = render_meta_data(id.as_str());
        let seed_iso_path = self
            .backend
            .build_seed_iso(&instance_dir, &user_data, &meta_data)?;

        let start_spec = StartSpec {
            id: id.clone(),
            instance_dir: instance_dir.clone(),
            arch: staged.arch,
            disk_path: staged.disk_path.clone(),
            workspace_path: req.workspace.clone(),
            state_path: state_dir.clone(),
            claw_path: claw_path.clone(),
            gateway,
            published_ports: published_ports.clone(),
            cpus: req.cpus,
            memory_mib: req.memory_mib,
            openclaw_package: DEFAULT_OPENCLAW_PACKAGE.to_string(),
            openclaw_config_json: resolved.config_json.clone(),
            openclaw_env: resolved.env.clone(),
            provision_scripts,
            volume_mounts,
            ssh_authorized_keys: req.ssh_authorized_keys.clone(),
        };
        let started = self.backend.start(&start_spec)?;

        let now = Utc::now();
        let mut meta = InstanceMetadata {
            id: id.clone(),
            image_ref: staged.image_ref.clone(),
            workspace_path: req.workspace.clone(),
            state_path: state_dir,
            gateway_port: gateway.host,
            published_ports,
            status: if req.no_wait {
                InstanceStatus::Running
            } else {
                InstanceStatus::Booting
            },
            backend: self.backend.name().to_string(),
            pid: started.pid,
            disk_path: staged.disk_path,
            seed_iso_path,
            serial_log_path: instance_dir.join(instance_files::SERIAL_LOG),
            vm_log_path: instance_dir.join(instance_files::VM_LOG),
            monitor_path: instance_dir.join(instance_files::MONITOR_SOCK),
            acceleration_kind: started.acceleration.as_str().to_string(),
            created_at_utc: now,
            updated_at_utc: now,
            last_error: None,
            source_clawbox: match target {
                RunTarget::Box(clawbox) => Some(clawbox.path().to_path_buf()),
                RunTarget::Ref(_) => None,
            },
        };
        self.store.store(&meta)?;
        acquire_while_locked(
            guard,
            &AcquireRequest {
                instance_id: id.to_string(),
                pid: started.pid,
                source_path: source_path.to_path_buf(),
            },
        )?;

        if req.no_wait {
            info!(id = %id, pid = started.pid, "started (not waiting for readiness)");
            return Ok(RunOutcome {
                id: id.clone(),
                status: meta.status,
                pid: started.pid,
                gateway,
                serial_log_path: meta.serial_log_path,
            });
        }

        let deadline = Instant::now() + req.ready_timeout;
        loop {
            if let ProbeOutcome::Healthy(_) = self.probe.probe(gateway.host, READY_PROBE_TIMEOUT) {
                meta.set_status(InstanceStatus::Ready, None);
                self.store.store(&meta)?;
                info!(id = %id, port = gateway.host, "gateway ready");
                return Ok(RunOutcome {
                    id: id.clone(),
                    status: InstanceStatus::Ready,
                    pid: started.pid,
                    gateway,
                    serial_log_path: meta.serial_log_path,
                });
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(READY_POLL_INTERVAL);
        }

        // Non-fatal: the VM stays up for inspection; ps will keep probing.
        let waited_secs = req.ready_timeout.as_secs();
        warn!(id = %id, waited_secs, "gateway did not become ready");
        meta.set_status(
            InstanceStatus::Booting,
            Some(format!("gateway not ready within {waited_secs}s")),
        );
        self.store.store(&meta)?;
        Err(Error::Unreachable {
            id: id.to_string(),
            waited_secs,
            serial_log: meta.serial_log_path,
        })
    }

    fn stage_artifact(&self, instance_dir: &Path, target: &RunTarget) -> Result<StagedDisk> {
        match target {
            RunTarget::Box(Clawbox::Archive(archive)) => {
                let outcome = archive.import(instance_dir)?;
                self.fetch_layers(&archive.spec)?;
                match outcome.run_disk {
                    Some(run_disk) => Ok(StagedDisk {
                        disk_path: run_disk,
                        arch: Arch::Amd64,
                        image_ref: archive.spec.base_image()?.source.clone(),
                    }),
                    None => self.stage_base_image(instance_dir, &archive.spec),
                }
            }
            RunTarget::Box(Clawbox::Header(header)) => {
                self.stage_base_image(instance_dir, &header.spec)
            }
            RunTarget::Ref(ref_name) => {
                let (blob_path, entry) = self.catalog.resolve(&self.blobs, ref_name)?;
                let disk_path = instance_dir.join(instance_files::DISK);
                copy_atomic(&blob_path, &disk_path)?;
                Ok(StagedDisk {
                    disk_path,
                    arch: entry.arch,
                    image_ref: ref_name.clone(),
                })
            }
        }
    }

    /// Resolve the base image to a blob and copy it in as the boot disk.
    fn stage_base_image(&self, instance_dir: &Path, spec: &ClawboxSpec) -> Result<StagedDisk> {
        let base = spec.base_image()?;
        let (blob_path, arch) = match base.parsed_source() {
            ImageSource::Remote(url) => {
                let cached = self.blobs.contains(&base.sha256);
                let path = self.blobs.ensure(&url, &base.sha256, "base")?;
                if cached {
                    info!(image = %base.source, "using cached base");
                }
                (path, Arch::Amd64)
            }
            ImageSource::Catalog(ref_name) => {
                let (path, entry) = self.catalog.resolve(&self.blobs, &ref_name)?;
                (path, entry.arch)
            }
            ImageSource::Embedded(_) => {
                return Err(Error::InvalidSpec(
                    "embedded base image requires the archive shape".into(),
                ));
            }
        };

        let disk_path = instance_dir.join(instance_files::DISK);
        copy_atomic(&blob_path, &disk_path)?;
        self.fetch_layers(spec)?;
        Ok(StagedDisk {
            disk_path,
            arch,
            image_ref: base.source.clone(),
        })
    }

    /// Download every declared non-base, non-embedded layer into the store.
    fn fetch_layers(&self, spec: &ClawboxSpec) -> Result<()> {
        for image in spec.images.iter().filter(|i| i.name != "base") {
            match image.parsed_source() {
                ImageSource::Remote(url) => {
                    self.blobs.ensure(&url, &image.sha256, &image.name)?;
                }
                ImageSource::Catalog(ref_name) => {
                    self.catalog.resolve(&self.blobs, &ref_name)?;
                }
                ImageSource::Embedded(_) => {}
            }
        }
        Ok(())
    }
}

struct StagedDisk {
    disk_path: PathBuf,
    arch: Arch,
    image_ref: String,
}

/// Resolve the run input to a clawbox or a catalog ref.
fn resolve_target(input: &str) -> Result<RunTarget> {
    if input == "." {
        let cwd = std::env::current_dir()?;
        let mut matches: Vec<PathBuf> = fs::read_dir(&cwd)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().map(|e| e == "clawbox").unwrap_or(false)
            })
            .collect();
        matches.sort();
        return match matches.len() {
            0 => Ok(RunTarget::Ref(input.to_string())),
            1 => Ok(RunTarget::Box(Clawbox::open(&matches[0])?)),
            _ => Err(Error::AmbiguousSource { dir: cwd, matches }),
        };
    }

    let path = Path::new(input);
    if path.is_file() {
        return Ok(RunTarget::Box(Clawbox::open(path)?));
    }
    Ok(RunTarget::Ref(input.to_string()))
}

/// Turn an arbitrary ref into a valid identity prefix.
fn sanitize_ref_prefix(ref_name: &str) -> String {
    let mut out: String = ref_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    out = out.trim_matches('-').to_string();
    if out.len() < 3 {
        out = format!("claw-{out}");
        out = out.trim_matches('-').to_string();
    }
    out
}

/// Copy with a temp sibling and rename so the destination is never short.
fn copy_atomic(src: &Path, dest: &Path) -> Result<()> {
    let tmp = dest.with_extension("img.tmp");
    if let Err(e) = fs::copy(src, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_prefix_sanitization() {
        assert_eq!(sanitize_ref_prefix("ubuntu-24.04"), "ubuntu-24-04");
        assert_eq!(sanitize_ref_prefix("Debian_12"), "debian-12");
        assert_eq!(sanitize_ref_prefix("x"), "claw-x");
        assert!(per_run_id(&sanitize_ref_prefix("ubuntu-24.04")).is_ok());
    }

    #[test]
    fn copy_atomic_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest.img");
        fs::write(&src, b"disk bytes").unwrap();
        copy_atomic(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"disk bytes");
        assert!(!dir.path().join("dest.img.tmp").exists());
    }
}
