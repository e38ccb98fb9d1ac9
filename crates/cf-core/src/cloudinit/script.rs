//! First-boot bootstrap script generation.
//!
//! The script must be safe to re-run: every step either checks before
//! acting (`mountpoint -q`, `id claw`, `command -v`) or overwrites its own
//! previous output. Secret values only ever appear single-quoted inside
//! the env file, which is created under `umask 077`.

use super::CloudInitInput;

/// Strict single-quote shell escaping: `'` becomes `'\''`.
pub fn shell_single_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Render the bootstrap script body.
pub fn render_bootstrap(input: &CloudInitInput<'_>) -> String {
    let port = input.gateway_guest_port;
    let mut s = String::new();

    s.push_str("#!/bin/sh\n");
    s.push_str("set -u\n");
    s.push_str("\n");

    // 9p modules are built into most cloud kernels; loading is best-effort.
    s.push_str("modprobe 9p 2>/dev/null || true\n");
    s.push_str("modprobe 9pnet_virtio 2>/dev/null || true\n");
    s.push_str("\n");

    s.push_str("mkdir -p /workspace /root/.openclaw /etc/clawfarm /claw\n");
    s.push_str("if ! id claw >/dev/null 2>&1; then\n");
    s.push_str("    useradd --create-home --shell /bin/bash claw 2>/dev/null || adduser -D claw 2>/dev/null || true\n");
    s.push_str("fi\n");
    s.push_str("chown claw:claw /claw 2>/dev/null || true\n");
    s.push_str("\n");

    if !input.ssh_authorized_keys.is_empty() {
        s.push_str("if [ ! -x /usr/sbin/sshd ]; then\n");
        s.push_str("    (apt-get update -y && apt-get install -y openssh-server) >/dev/null 2>&1 || true\n");
        s.push_str("    systemctl enable --now ssh 2>/dev/null || systemctl enable --now sshd 2>/dev/null || true\n");
        s.push_str("fi\n");
        s.push_str("\n");
    }

    for (i, guest_path) in input.volume_guest_paths.iter().enumerate() {
        let quoted = shell_single_quote(guest_path);
        s.push_str(&format!("install -d {quoted}\n"));
        s.push_str(&format!(
            "mountpoint -q {quoted} || mount -t 9p -o trans=virtio,version=9p2000.L volume{i} {quoted} || true\n"
        ));
    }
    if !input.volume_guest_paths.is_empty() {
        s.push_str("\n");
    }

    for (tag, path) in [
        ("workspace", "/workspace"),
        ("state", "/root/.openclaw"),
        ("claw", "/claw"),
    ] {
        s.push_str(&format!(
            "mountpoint -q {path} || mount -t 9p -o trans=virtio,version=9p2000.L {tag} {path} || true\n"
        ));
    }
    s.push_str("\n");

    s.push_str("cat > /etc/clawfarm/openclaw.json <<'CLAWFARM_EOF_JSON'\n");
    s.push_str(input.openclaw_config_json);
    if !input.openclaw_config_json.ends_with('\n') {
        s.push('\n');
    }
    s.push_str("CLAWFARM_EOF_JSON\n");
    s.push_str("\n");

    s.push_str("umask 077\n");
    s.push_str("cat > /etc/clawfarm/openclaw.env <<'CLAWFARM_EOF_ENV'\n");
    for (key, value) in input.openclaw_env {
        s.push_str(&format!("export {key}={}\n", shell_single_quote(value)));
    }
    s.push_str("CLAWFARM_EOF_ENV\n");
    s.push_str("chmod 0600 /etc/clawfarm/openclaw.env\n");
    s.push_str("umask 022\n");
    s.push_str("\n");

    s.push_str("cat > /usr/local/bin/clawfarm-gateway.sh <<'CLAWFARM_EOF_GW'\n");
    s.push_str("#!/bin/sh\n");
    s.push_str("[ -f /etc/clawfarm/openclaw.env ] && . /etc/clawfarm/openclaw.env\n");
    s.push_str("if command -v openclaw >/dev/null 2>&1; then\n");
    s.push_str(&format!(
        "    exec openclaw gateway --port {port} --config /etc/clawfarm/openclaw.json\n"
    ));
    s.push_str("fi\n");
    s.push_str(&format!(
        "exec python3 -m http.server {port} --directory /workspace\n"
    ));
    s.push_str("CLAWFARM_EOF_GW\n");
    s.push_str("chmod 0755 /usr/local/bin/clawfarm-gateway.sh\n");
    s.push_str("\n");

    s.push_str("cat > /etc/systemd/system/clawfarm-gateway.service <<'CLAWFARM_EOF_UNIT'\n");
    s.push_str("[Unit]\n");
    s.push_str("Description=Clawfarm OpenClaw gateway\n");
    s.push_str("After=network.target\n");
    s.push_str("\n");
    s.push_str("[Service]\n");
    s.push_str("ExecStart=/usr/local/bin/clawfarm-gateway.sh\n");
    s.push_str("Restart=always\n");
    s.push_str("RestartSec=2\n");
    s.push_str("\n");
    s.push_str("[Install]\n");
    s.push_str("WantedBy=multi-user.target\n");
    s.push_str("CLAWFARM_EOF_UNIT\n");
    s.push_str("systemctl daemon-reload 2>/dev/null || true\n");
    s.push_str("systemctl enable --now clawfarm-gateway.service 2>/dev/null || true\n");
    s.push_str("\n");

    s.push_str("if ! command -v openclaw >/dev/null 2>&1; then\n");
    s.push_str(&format!(
        "    ( npm install -g {} >/var/log/clawfarm-install.log 2>&1 \\\n",
        shell_single_quote(input.openclaw_package)
    ));
    s.push_str("        && systemctl restart clawfarm-gateway.service ) &\n");
    s.push_str("fi\n");

    if !input.provision_scripts.is_empty() {
        s.push_str("\n");
        s.push_str("cat > /usr/local/bin/clawfarm-provision.sh <<'CLAWFARM_EOF_PROV'\n");
        s.push_str("#!/bin/sh\n");
        s.push_str("set -eu\n");
        for step in input.provision_scripts {
            s.push_str(step);
            if !step.ends_with('\n') {
                s.push('\n');
            }
        }
        s.push_str("CLAWFARM_EOF_PROV\n");
        s.push_str("chmod 0755 /usr/local/bin/clawfarm-provision.sh\n");
        s.push_str(
            "/usr/local/bin/clawfarm-provision.sh >>/var/log/clawfarm-provision.log 2>&1 || true\n",
        );
    }

    s
}

#[cfg(test)]
mod tests {
    use super::super::CloudInitInput;
    use super::*;
    use std::collections::BTreeMap;

    fn base_input<'a>(env: &'a BTreeMap<String, String>) -> CloudInitInput<'a> {
        CloudInitInput {
            instance_id: "demo-abc",
            gateway_guest_port: 8080,
            openclaw_package: "openclaw@latest",
            openclaw_config_json: "{}",
            openclaw_env: env,
            ssh_authorized_keys: &[],
            volume_guest_paths: &[],
            provision_scripts: &[],
        }
    }

    #[test]
    fn quoting_handles_embedded_quotes() {
        assert_eq!(shell_single_quote("plain"), "'plain'");
        assert_eq!(shell_single_quote("don't"), "'don'\\''t'");
        assert_eq!(shell_single_quote(""), "''");
        // A value that is itself quote-heavy survives.
        assert_eq!(shell_single_quote("'''"), "''\\'''\\'''\\'''");
    }

    #[test]
    fn env_values_are_single_quoted() {
        let mut env = BTreeMap::new();
        env.insert("OPENAI_API_KEY".into(), "sk-with'quote".into());
        let script = render_bootstrap(&base_input(&env));
        assert!(script.contains("export OPENAI_API_KEY='sk-with'\\''quote'"));
        // The env file is created under a restrictive umask and locked down.
        let umask_pos = script.find("umask 077").unwrap();
        let env_pos = script.find("openclaw.env").unwrap();
        assert!(umask_pos < env_pos);
        assert!(script.contains("chmod 0600 /etc/clawfarm/openclaw.env"));
    }

    #[test]
    fn volume_mounts_are_idempotent_and_ordered() {
        let env = BTreeMap::new();
        let volumes = vec!["/data".to_string(), "/models cache".to_string()];
        let mut input = base_input(&env);
        input.volume_guest_paths = &volumes;
        let script = render_bootstrap(&input);

        assert!(script.contains("mountpoint -q '/data' || mount -t 9p"));
        assert!(script.contains("volume0 '/data'"));
        // Paths with spaces stay quoted.
        assert!(script.contains("volume1 '/models cache'"));
        assert!(script.find("volume0").unwrap() < script.find("volume1").unwrap());
    }

    #[test]
    fn shared_tags_are_mounted() {
        let env = BTreeMap::new();
        let script = render_bootstrap(&base_input(&env));
        assert!(script.contains("workspace /workspace"));
        assert!(script.contains("state /root/.openclaw"));
        assert!(script.contains("claw /claw"));
        // Idempotence guard on each.
        assert_eq!(script.matches("mountpoint -q /").count(), 3);
    }

    #[test]
    fn ssh_install_only_with_keys() {
        let env = BTreeMap::new();
        let script = render_bootstrap(&base_input(&env));
        assert!(!script.contains("openssh-server"));

        let keys = vec!["ssh-ed25519 AAA test".to_string()];
        let mut input = base_input(&env);
        input.ssh_authorized_keys = &keys;
        let script = render_bootstrap(&input);
        assert!(script.contains("openssh-server"));
        assert!(script.contains("[ ! -x /usr/sbin/sshd ]"));
    }

    #[test]
    fn gateway_launcher_has_fallback() {
        let env = BTreeMap::new();
        let script = render_bootstrap(&base_input(&env));
        assert!(script.contains("exec openclaw gateway --port 8080"));
        assert!(script.contains("exec python3 -m http.server 8080"));
        assert!(script.contains("Restart=always"));
    }

    #[test]
    fn provision_emitted_only_when_declared() {
        let env = BTreeMap::new();
        let script = render_bootstrap(&base_input(&env));
        assert!(!script.contains("clawfarm-provision.sh"));

        let steps = vec!["apt-get install -y ripgrep".to_string()];
        let mut input = base_input(&env);
        input.provision_scripts = &steps;
        let script = render_bootstrap(&input);
        assert!(script.contains("apt-get install -y ripgrep"));
        // Provisioning runs after the gateway unit is enabled.
        let unit_pos = script.find("clawfarm-gateway.service").unwrap();
        let prov_pos = script.find("clawfarm-provision.sh").unwrap();
        assert!(unit_pos < prov_pos);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Undo POSIX single-quoting the way a shell would read it back.
        fn shell_unquote(quoted: &str) -> Option<String> {
            let mut out = String::new();
            let mut rest = quoted;
            loop {
                let inner = rest.strip_prefix('\'')?;
                let end = inner.find('\'')?;
                out.push_str(&inner[..end]);
                rest = &inner[end + 1..];
                if rest.is_empty() {
                    return Some(out);
                }
                // Between segments sits an escaped quote.
                rest = rest.strip_prefix("\\'")?;
                out.push('\'');
            }
        }

        proptest! {
            #[test]
            fn quoting_roundtrips_through_a_shell_reader(value in ".*") {
                let quoted = shell_single_quote(&value);
                prop_assert_eq!(shell_unquote(&quoted), Some(value));
            }
        }
    }

    #[test]
    fn script_is_deterministic() {
        let mut env = BTreeMap::new();
        env.insert("B_KEY".into(), "2".into());
        env.insert("A_KEY".into(), "1".into());
        let a = render_bootstrap(&base_input(&env));
        let b = render_bootstrap(&base_input(&env));
        assert_eq!(a, b);
        // BTreeMap iteration puts A_KEY before B_KEY.
        assert!(a.find("A_KEY").unwrap() < a.find("B_KEY").unwrap());
    }
}
