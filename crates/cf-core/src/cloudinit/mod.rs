//! Cloud-init payload synthesis.
//!
//! Pure functions from a declarative input to the two cloud-init documents
//! (`user-data`, `meta-data`); the backend packs them into a `cidata` ISO.
//! Same input, same bytes: no clocks, no randomness, map iteration in key
//! order.

pub mod script;

pub use script::{render_bootstrap, shell_single_quote};

use std::collections::BTreeMap;

/// Well-known paths inside the guest.
pub const BOOTSTRAP_PATH: &str = "/usr/local/bin/clawfarm-bootstrap.sh";
pub const BOOTSTRAP_LOG: &str = "/var/log/clawfarm-bootstrap.log";

/// Everything the first boot needs to know.
#[derive(Debug, Clone)]
pub struct CloudInitInput<'a> {
    pub instance_id: &'a str,
    pub gateway_guest_port: u16,
    /// Package spec installed when the guest has no OpenClaw yet.
    pub openclaw_package: &'a str,
    /// Generated configuration document, written verbatim into the guest.
    pub openclaw_config_json: &'a str,
    /// Env exports for the gateway; values are shell-escaped on render.
    pub openclaw_env: &'a BTreeMap<String, String>,
    pub ssh_authorized_keys: &'a [String],
    /// Guest mount points, in volume order; tag `volume<N>` is implied.
    pub volume_guest_paths: &'a [String],
    pub provision_scripts: &'a [String],
}

/// Render the `#cloud-config` user-data document.
pub fn render_user_data(input: &CloudInitInput<'_>) -> String {
    let mut out = String::new();
    out.push_str("#cloud-config\n");
    out.push_str(&format!("hostname: {}\n", input.instance_id));

    out.push_str("users:\n");
    out.push_str("  - name: claw\n");
    out.push_str("    sudo: \"ALL=(ALL) NOPASSWD:ALL\"\n");
    out.push_str("    shell: /bin/bash\n");
    out.push_str("    lock_passwd: true\n");
    if !input.ssh_authorized_keys.is_empty() {
        out.push_str("    ssh_authorized_keys:\n");
        for key in input.ssh_authorized_keys {
            out.push_str(&format!("      - {key}\n"));
        }
    }

    out.push_str("write_files:\n");
    out.push_str(&format!("  - path: {BOOTSTRAP_PATH}\n"));
    out.push_str("    permissions: \"0755\"\n");
    out.push_str("    content: |\n");
    out.push_str(&indent(&render_bootstrap(input), 6));

    out.push_str("runcmd:\n");
    out.push_str(&format!(
        "  - [sh, -c, \"{BOOTSTRAP_PATH} >>{BOOTSTRAP_LOG} 2>&1\"]\n"
    ));

    out
}

/// Render the `meta-data` document.
pub fn render_meta_data(instance_id: &str) -> String {
    format!("instance-id: {instance_id}\nlocal-hostname: {instance_id}\n")
}

/// Prefix every line (including empty ones inside the block) with spaces.
fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    let mut out = String::new();
    for line in text.lines() {
        if line.is_empty() {
            out.push('\n');
        } else {
            out.push_str(&pad);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
