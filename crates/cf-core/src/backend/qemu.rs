//! QEMU backend.
//!
//! Argument assembly is a pure function so it can be tested without a
//! hypervisor; process control is plain signal delivery with staged
//! escalation (SIGTERM, grace, SIGKILL). The seed ISO is produced by
//! shelling out to whichever of `genisoimage`, `mkisofs`, `xorriso` is on
//! PATH, with the `cidata` volume label cloud-init expects.

use super::{Accel, Arch, StartResult, StartSpec, VmBackend};
use cf_common::{Error, Result};
use cf_config::instance_files;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Grace after SIGTERM before escalating.
const TERM_WAIT: Duration = Duration::from_secs(20);
/// Wait after SIGKILL before declaring the process stuck.
const KILL_WAIT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// ISO tools probed in order.
const ISO_TOOLS: &[&str] = &["genisoimage", "mkisofs", "xorriso"];

/// The production VM backend.
pub struct QemuBackend;

impl QemuBackend {
    pub fn new() -> Self {
        Self
    }

    fn binary_for(arch: Arch) -> &'static str {
        match arch {
            Arch::Amd64 => "qemu-system-x86_64",
            Arch::Arm64 => "qemu-system-aarch64",
        }
    }

    /// Pick the best available acceleration for the target architecture.
    ///
    /// KVM only helps when the guest matches the host architecture; an
    /// emulated foreign guest falls back to TCG.
    pub fn detect_accel(arch: Arch) -> Accel {
        #[cfg(target_os = "linux")]
        {
            let host_matches = match arch {
                Arch::Amd64 => cfg!(target_arch = "x86_64"),
                Arch::Arm64 => cfg!(target_arch = "aarch64"),
            };
            if host_matches && Path::new("/dev/kvm").exists() {
                return Accel::Kvm;
            }
        }
        #[cfg(target_os = "macos")]
        {
            let host_matches = match arch {
                Arch::Amd64 => cfg!(target_arch = "x86_64"),
                Arch::Arm64 => cfg!(target_arch = "aarch64"),
            };
            if host_matches {
                return Accel::Hvf;
            }
        }
        let _ = arch;
        Accel::Tcg
    }
}

impl Default for QemuBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble the QEMU argument vector for one instance. Pure.
pub fn build_qemu_args(spec: &StartSpec, accel: Accel) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let dir = &spec.instance_dir;

    args.push("-name".into());
    args.push(spec.id.to_string());

    let machine = match spec.arch {
        Arch::Amd64 => format!("q35,accel={}", accel.as_str()),
        Arch::Arm64 => format!("virt,accel={}", accel.as_str()),
    };
    args.push("-machine".into());
    args.push(machine);

    args.push("-cpu".into());
    args.push(match accel {
        Accel::Kvm | Accel::Hvf => "host".into(),
        Accel::Tcg => "max".into(),
    });

    args.push("-smp".into());
    args.push(spec.cpus.to_string());
    args.push("-m".into());
    args.push(format!("{}M", spec.memory_mib));

    args.push("-drive".into());
    args.push(format!(
        "file={},if=virtio,format=qcow2",
        spec.disk_path.display()
    ));
    args.push("-cdrom".into());
    args.push(dir.join(instance_files::SEED_ISO).display().to_string());

    // User-mode networking with every normalized forward on loopback.
    let mut netdev = String::from("user,id=net0");
    for mapping in &spec.published_ports {
        netdev.push_str(&format!(
            ",hostfwd=tcp:127.0.0.1:{}-:{}",
            mapping.host, mapping.guest
        ));
    }
    args.push("-netdev".into());
    args.push(netdev);
    args.push("-device".into());
    args.push("virtio-net-pci,netdev=net0".into());

    // 9p shares: fixed tags first, then numbered volume tags.
    let mut shares: Vec<(String, PathBuf)> = Vec::new();
    if let Some(ws) = &spec.workspace_path {
        shares.push(("workspace".into(), ws.clone()));
    }
    shares.push(("state".into(), spec.state_path.clone()));
    if let Some(claw) = &spec.claw_path {
        shares.push(("claw".into(), claw.clone()));
    }
    for (i, volume) in spec.volume_mounts.iter().enumerate() {
        shares.push((format!("volume{i}"), volume.host_path.clone()));
    }
    for (i, (tag, path)) in shares.iter().enumerate() {
        args.push("-fsdev".into());
        args.push(format!(
            "local,id=fs{i},path={},security_model=mapped-xattr",
            path.display()
        ));
        args.push("-device".into());
        args.push(format!("virtio-9p-pci,fsdev=fs{i},mount_tag={tag}"));
    }

    args.push("-serial".into());
    args.push(format!(
        "file:{}",
        dir.join(instance_files::SERIAL_LOG).display()
    ));
    args.push("-monitor".into());
    args.push(format!(
        "unix:{},server,nowait",
        dir.join(instance_files::MONITOR_SOCK).display()
    ));
    args.push("-display".into());
    args.push("none".into());

    args
}

/// Locate a binary on PATH.
fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(unix)]
fn send_signal(pid: i64, signal: i32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Err(Error::Backend(format!("process {pid} not found"))),
        Some(libc::EPERM) => Err(Error::Backend(format!("no permission to signal {pid}"))),
        _ => Err(Error::Backend(err.to_string())),
    }
}

#[cfg(unix)]
fn process_exists(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM means it exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(unix)]
fn wait_for_exit(pid: i64, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !process_exists(pid) {
            return true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    !process_exists(pid)
}

#[cfg(unix)]
impl VmBackend for QemuBackend {
    fn name(&self) -> &'static str {
        "qemu"
    }

    fn start(&self, spec: &StartSpec) -> Result<StartResult> {
        let binary = Self::binary_for(spec.arch);
        let Some(qemu) = find_on_path(binary) else {
            return Err(Error::Backend(format!("{binary} not found on PATH")));
        };

        let accel = Self::detect_accel(spec.arch);
        let args = build_qemu_args(spec, accel);
        debug!(id = %spec.id, accel = accel.as_str(), "starting qemu");

        let vm_log = File::create(spec.instance_dir.join(instance_files::VM_LOG))?;
        let child = Command::new(&qemu)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(vm_log.try_clone()?))
            .stderr(Stdio::from(vm_log))
            .spawn()
            .map_err(|e| Error::Backend(format!("failed to spawn {binary}: {e}")))?;

        let pid = child.id() as i64;
        fs::write(
            spec.instance_dir.join(instance_files::QEMU_PID),
            format!("{pid}\n"),
        )?;
        info!(id = %spec.id, pid, accel = accel.as_str(), "qemu started");

        Ok(StartResult {
            pid,
            acceleration: accel,
        })
    }

    fn stop(&self, pid: i64) -> Result<()> {
        if !process_exists(pid) {
            return Ok(());
        }
        send_signal(pid, libc::SIGTERM)?;
        if wait_for_exit(pid, TERM_WAIT) {
            return Ok(());
        }
        warn!(pid, "SIGTERM grace expired, escalating to SIGKILL");
        send_signal(pid, libc::SIGKILL)?;
        if wait_for_exit(pid, KILL_WAIT) {
            return Ok(());
        }
        Err(Error::Backend(format!(
            "process {pid} survived SIGKILL (uninterruptible state?)"
        )))
    }

    fn suspend(&self, pid: i64) -> Result<()> {
        send_signal(pid, libc::SIGSTOP)
    }

    fn resume(&self, pid: i64) -> Result<()> {
        send_signal(pid, libc::SIGCONT)
    }

    fn is_running(&self, pid: i64) -> bool {
        process_exists(pid)
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

        let iso_path = instance_dir.join(instance_files::SEED_ISO);
        let Some((tool, tool_path)) = ISO_TOOLS
            .iter()
            .find_map(|t| find_on_path(t).map(|p| (*t, p)))
        else {
            return Err(Error::Backend(format!(
                "no ISO tool available (need one of: {})",
                ISO_TOOLS.join(", ")
            )));
        };

        let mut cmd = Command::new(&tool_path);
        if tool == "xorriso" {
            cmd.args(["-as", "mkisofs"]);
        }
        let output = cmd
            .args(["-output"])
            .arg(&iso_path)
            .args(["-volid", "cidata", "-joliet", "-rock"])
            .args(["user-data", "meta-data"])
            .current_dir(&staging)
            .output()
            .map_err(|e| Error::Backend(format!("failed to run {tool}: {e}")))?;

        if !output.status.success() {
            return Err(Error::Backend(format!(
                "{tool} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(iso = %iso_path.display(), tool, "seed iso built");
        Ok(iso_path)
    }
}

#[cfg(not(unix))]
impl VmBackend for QemuBackend {
    fn name(&self) -> &'static str {
        "qemu"
    }

    fn start(&self, _spec: &StartSpec) -> Result<StartResult> {
        Err(Error::Unsupported("qemu backend requires unix".into()))
    }

    fn stop(&self, _pid: i64) -> Result<()> {
        Err(Error::Unsupported("qemu backend requires unix".into()))
    }

    fn suspend(&self, _pid: i64) -> Result<()> {
        Err(Error::Unsupported("qemu backend requires unix".into()))
    }

    fn resume(&self, _pid: i64) -> Result<()> {
        Err(Error::Unsupported("qemu backend requires unix".into()))
    }

    fn is_running(&self, _pid: i64) -> bool {
        false
    }

    fn build_seed_iso(&self, _dir: &Path, _user_data: &str, _meta_data: &str) -> Result<PathBuf> {
        Err(Error::Unsupported("qemu backend requires unix".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_common::{ClawId, PortMapping};
    use std::collections::BTreeMap;

    fn spec() -> StartSpec {
        let dir = PathBuf::from("/home/claws/demo-abc");
        StartSpec {
            id: ClawId::parse("demo-abc").unwrap(),
            instance_dir: dir.clone(),
            arch: Arch::Amd64,
            disk_path: dir.join("instance.img"),
            workspace_path: Some(PathBuf::from("/work")),
            state_path: dir.join("state"),
            claw_path: Some(dir.join("claw")),
            gateway: PortMapping::new(8090, 8080),
            published_ports: vec![PortMapping::new(8090, 8080), PortMapping::new(2222, 22)],
            cpus: 2,
            memory_mib: 2048,
            openclaw_package: "openclaw@latest".into(),
            openclaw_config_json: "{}".into(),
            openclaw_env: BTreeMap::new(),
            provision_scripts: vec![],
            volume_mounts: vec![super::super::VolumeMount {
                name: "data".into(),
                host_path: dir.join("volumes/data"),
                guest_path: "/data".into(),
            }],
            ssh_authorized_keys: vec![],
        }
    }

    #[test]
    fn args_carry_every_forward() {
        let args = build_qemu_args(&spec(), Accel::Tcg);
        let netdev = args
            .iter()
            .find(|a| a.starts_with("user,id=net0"))
            .expect("netdev arg");
        assert!(netdev.contains("hostfwd=tcp:127.0.0.1:8090-:8080"));
        assert!(netdev.contains("hostfwd=tcp:127.0.0.1:2222-:22"));
    }

    #[test]
    fn args_mount_fixed_and_volume_tags() {
        let args = build_qemu_args(&spec(), Accel::Tcg);
        let joined = args.join(" ");
        assert!(joined.contains("mount_tag=workspace"));
        assert!(joined.contains("mount_tag=state"));
        assert!(joined.contains("mount_tag=claw"));
        assert!(joined.contains("mount_tag=volume0"));
    }

    #[test]
    fn accel_selects_cpu_model() {
        let kvm_args = build_qemu_args(&spec(), Accel::Kvm);
        let cpu_idx = kvm_args.iter().position(|a| a == "-cpu").unwrap();
        assert_eq!(kvm_args[cpu_idx + 1], "host");

        let tcg_args = build_qemu_args(&spec(), Accel::Tcg);
        let cpu_idx = tcg_args.iter().position(|a| a == "-cpu").unwrap();
        assert_eq!(tcg_args[cpu_idx + 1], "max");
    }

    #[test]
    fn arm64_uses_virt_machine() {
        let mut s = spec();
        s.arch = Arch::Arm64;
        let args = build_qemu_args(&s, Accel::Tcg);
        let machine_idx = args.iter().position(|a| a == "-machine").unwrap();
        assert!(args[machine_idx + 1].starts_with("virt,"));
    }

    #[test]
    fn args_are_deterministic() {
        assert_eq!(
            build_qemu_args(&spec(), Accel::Tcg),
            build_qemu_args(&spec(), Accel::Tcg)
        );
    }

    #[cfg(unix)]
    #[test]
    fn process_exists_for_self_not_for_bogus() {
        assert!(process_exists(std::process::id() as i64));
        assert!(!process_exists(999_999_999));
        assert!(!process_exists(0));
        assert!(!process_exists(-1));
    }

    #[cfg(unix)]
    #[test]
    fn stop_of_dead_pid_is_ok() {
        let backend = QemuBackend::new();
        assert!(backend.stop(999_999_999).is_ok());
    }
}
