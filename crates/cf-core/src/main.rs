//! Clawfarm CLI.
//!
//! Thin front-end over the orchestrator: argument parsing, payload output
//! on stdout, logs on stderr. Errors print as `<kind>: <reason>` and exit
//! with status 1; everything else exits 0.

use cf_box::GatewayAuthMode;
use cf_common::{ClawId, Error, PortMapping, Result};
use cf_config::Config;
use cf_core::backend::qemu::QemuBackend;
use cf_core::instance::InstanceMetadata;
use cf_core::orchestrator::{Orchestrator, RunRequest};
use cf_core::preflight::{CredentialOverrides, ModelProvider};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Clawfarm - agent-oriented VM sandbox runtime
#[derive(Parser)]
#[command(name = "clawfarm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start an instance from a catalog image ref
    New {
        /// Image ref from the catalog (e.g. ubuntu-24.04)
        image_ref: String,

        #[command(flatten)]
        common: CommonRunOpts,

        #[command(flatten)]
        openclaw: OpenClawOpts,
    },

    /// Start an instance from a clawbox file, a ref, or `.`
    Run {
        /// A ref, a path to a .clawbox file, or `.`
        input: String,

        #[command(flatten)]
        common: CommonRunOpts,

        /// Do not wait for the gateway to become ready
        #[arg(long)]
        no_wait: bool,

        /// Readiness deadline in seconds
        #[arg(long, default_value_t = 120)]
        ready_timeout_secs: u64,

        /// Additional host:guest port forwards (repeatable)
        #[arg(long = "publish", value_name = "HOST:GUEST")]
        publish: Vec<String>,

        #[command(flatten)]
        openclaw: OpenClawOpts,
    },

    /// List instances with reconciled status
    Ps {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// SIGSTOP an instance's VM process
    Suspend { id: String },

    /// SIGCONT a suspended instance
    Resume { id: String },

    /// Stop and delete an instance
    Rm { id: String },

    /// Dump one instance's metadata as JSON
    Show { id: String },

    /// Copy the instance's source clawbox to a file
    Export {
        id: String,
        /// Output path (conventionally *.clawbox)
        output: PathBuf,

        /// Rewrite the box name on the way out
        #[arg(long)]
        name: Option<String>,

        /// Export even when the secret scan finds matches
        #[arg(long)]
        allow_secrets: bool,
    },

    /// Copy the writable disk to a named checkpoint.
    /// The VM may be live; suspend first for a crash-consistent copy.
    Checkpoint {
        id: String,
        #[arg(long)]
        name: String,
    },

    /// Copy a named checkpoint back over the writable disk
    Restore { id: String, name: String },
}

/// Flags shared by `new` and `run`.
#[derive(Args, Debug)]
struct CommonRunOpts {
    /// Shell command run during first boot (repeatable)
    #[arg(long = "run", value_name = "CMD")]
    run_commands: Vec<String>,

    /// Volume declaration name:/guest/path (repeatable)
    #[arg(long = "volume", value_name = "NAME:/GUEST/PATH")]
    volumes: Vec<String>,

    /// Host port for the gateway
    #[arg(long = "port", default_value_t = 8090)]
    port: u16,

    /// Host directory shared into the guest at /workspace
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Guest vCPU count
    #[arg(long, default_value_t = 2)]
    cpus: u32,

    /// Guest memory in MiB
    #[arg(long, default_value_t = 2048)]
    memory_mib: u32,

    /// Instance name (prefix for per-run identities)
    #[arg(long)]
    name: Option<String>,
}

/// OpenClaw credential flags.
#[derive(Args, Debug)]
struct OpenClawOpts {
    /// Guest env KEY=VALUE (repeatable)
    #[arg(long = "openclaw-env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// KEY=VALUE file (# comments, optional `export` prefix)
    #[arg(long = "openclaw-env-file")]
    env_file: Option<PathBuf>,

    /// JSON config merged under the generated configuration
    #[arg(long = "openclaw-config")]
    config: Option<PathBuf>,

    #[arg(long = "openclaw-openai-api-key")]
    openai_api_key: Option<String>,

    #[arg(long = "openclaw-anthropic-api-key")]
    anthropic_api_key: Option<String>,

    #[arg(long = "openclaw-gemini-api-key")]
    gemini_api_key: Option<String>,

    #[arg(long = "openclaw-grok-api-key")]
    grok_api_key: Option<String>,

    #[arg(long = "openclaw-openrouter-api-key")]
    openrouter_api_key: Option<String>,

    #[arg(long = "openclaw-zai-api-key")]
    zai_api_key: Option<String>,

    /// token | password | none
    #[arg(long = "openclaw-gateway-auth-mode")]
    gateway_auth_mode: Option<String>,

    #[arg(long = "openclaw-gateway-token")]
    gateway_token: Option<String>,

    #[arg(long = "openclaw-gateway-password")]
    gateway_password: Option<String>,

    /// provider/model (e.g. anthropic/claude-sonnet-4)
    #[arg(long = "openclaw-model-primary")]
    model_primary: Option<String>,
}

fn main() {
    cf_core::logging::init_logging();
    let cli = Cli::parse();

    if let Err(err) = dispatch(cli) {
        eprintln!("{}", err.to_cli_string());
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::from_env();
    let orchestrator = Orchestrator::new(config, Box::new(QemuBackend::new()))?;

    match cli.command {
        Commands::New {
            image_ref,
            common,
            openclaw,
        } => {
            let mut req = build_run_request(image_ref, common, openclaw)?;
            req.ready_timeout = Duration::from_secs(120);
            run_and_report(&orchestrator, &req)
        }
        Commands::Run {
            input,
            common,
            no_wait,
            ready_timeout_secs,
            publish,
            openclaw,
        } => {
            let mut req = build_run_request(input, common, openclaw)?;
            req.no_wait = no_wait;
            req.ready_timeout = Duration::from_secs(ready_timeout_secs);
            req.publish = publish
                .iter()
                .map(|s| parse_port_mapping(s))
                .collect::<Result<Vec<_>>>()?;
            run_and_report(&orchestrator, &req)
        }
        Commands::Ps { json } => {
            let listed = orchestrator.ps()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listed)?);
            } else {
                print_ps_table(&listed);
            }
            Ok(())
        }
        Commands::Suspend { id } => orchestrator.suspend(&ClawId::parse(&id)?),
        Commands::Resume { id } => orchestrator.resume(&ClawId::parse(&id)?),
        Commands::Rm { id } => orchestrator.remove(&ClawId::parse(&id)?),
        Commands::Show { id } => {
            let meta = orchestrator.show(&ClawId::parse(&id)?)?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
            Ok(())
        }
        Commands::Export {
            id,
            output,
            name,
            allow_secrets,
        } => orchestrator.export(
            &ClawId::parse(&id)?,
            &output,
            name.as_deref(),
            allow_secrets,
        ),
        Commands::Checkpoint { id, name } => {
            orchestrator.checkpoint(&ClawId::parse(&id)?, &name)
        }
        Commands::Restore { id, name } => orchestrator.restore(&ClawId::parse(&id)?, &name),
    }
}

fn run_and_report(orchestrator: &Orchestrator, req: &RunRequest) -> Result<()> {
    let outcome = orchestrator.run(req)?;
    println!(
        "{} {} pid={} gateway=http://127.0.0.1:{}/",
        outcome.id, outcome.status, outcome.pid, outcome.gateway.host
    );
    Ok(())
}

fn build_run_request(
    input: String,
    common: CommonRunOpts,
    openclaw: OpenClawOpts,
) -> Result<RunRequest> {
    let volumes = common
        .volumes
        .iter()
        .map(|v| parse_volume(v))
        .collect::<Result<Vec<_>>>()?;

    Ok(RunRequest {
        input,
        name_override: common.name,
        workspace: common.workspace,
        gateway_port: common.port,
        publish: Vec::new(),
        cpus: common.cpus,
        memory_mib: common.memory_mib,
        ready_timeout: Duration::from_secs(120),
        no_wait: false,
        volumes,
        run_commands: common.run_commands,
        ssh_authorized_keys: Vec::new(),
        credentials: build_credentials(openclaw)?,
    })
}

fn build_credentials(opts: OpenClawOpts) -> Result<CredentialOverrides> {
    let mut credentials = CredentialOverrides {
        primary_model: opts.model_primary,
        gateway_token: opts.gateway_token,
        gateway_password: opts.gateway_password,
        env_file: opts.env_file,
        config_file: opts.config,
        ..Default::default()
    };

    if let Some(mode) = &opts.gateway_auth_mode {
        credentials.gateway_auth_mode = Some(parse_auth_mode(mode)?);
    }
    for pair in &opts.env {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::InvalidSpec(format!(
                "--openclaw-env expects KEY=VALUE, got {pair:?}"
            )));
        };
        credentials.env.push((key.to_string(), value.to_string()));
    }

    let provider_keys = [
        (ModelProvider::OpenAi, opts.openai_api_key),
        (ModelProvider::Anthropic, opts.anthropic_api_key),
        (ModelProvider::Gemini, opts.gemini_api_key),
        (ModelProvider::Grok, opts.grok_api_key),
        (ModelProvider::OpenRouter, opts.openrouter_api_key),
        (ModelProvider::Zai, opts.zai_api_key),
    ];
    for (provider, key) in provider_keys {
        if let Some(key) = key {
            credentials.provider_api_keys.insert(provider, key);
        }
    }

    Ok(credentials)
}

fn parse_auth_mode(mode: &str) -> Result<GatewayAuthMode> {
    match mode {
        "token" => Ok(GatewayAuthMode::Token),
        "password" => Ok(GatewayAuthMode::Password),
        "none" => Ok(GatewayAuthMode::None),
        other => Err(Error::InvalidSpec(format!(
            "gateway auth mode {other:?} (expected token, password, or none)"
        ))),
    }
}

fn parse_port_mapping(value: &str) -> Result<PortMapping> {
    let parse = |s: &str| -> Result<u16> {
        s.parse::<u16>().map_err(|_| Error::InvalidPort {
            port: s.parse::<u32>().unwrap_or(0),
        })
    };
    let Some((host, guest)) = value.split_once(':') else {
        return Err(Error::InvalidSpec(format!(
            "--publish expects HOST:GUEST, got {value:?}"
        )));
    };
    Ok(PortMapping::new(parse(host)?, parse(guest)?))
}

fn parse_volume(value: &str) -> Result<(String, String)> {
    let Some((name, guest_path)) = value.split_once(':') else {
        return Err(Error::InvalidSpec(format!(
            "--volume expects NAME:/GUEST/PATH, got {value:?}"
        )));
    };
    if name.is_empty() || !guest_path.starts_with('/') {
        return Err(Error::InvalidSpec(format!(
            "--volume expects NAME:/GUEST/PATH, got {value:?}"
        )));
    }
    Ok((name.to_string(), guest_path.to_string()))
}

fn print_ps_table(listed: &[InstanceMetadata]) {
    if listed.is_empty() {
        println!("no instances");
        return;
    }
    println!(
        "{:<28} {:<10} {:>8} {:>8} {:<20} {}",
        "ID", "STATUS", "PID", "GATEWAY", "IMAGE", "LAST ERROR"
    );
    for meta in listed {
        println!(
            "{:<28} {:<10} {:>8} {:>8} {:<20} {}",
            meta.id,
            meta.status.to_string(),
            meta.pid,
            meta.gateway_port,
            truncate(&meta.image_ref, 20),
            meta.last_error.as_deref().unwrap_or("-"),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
