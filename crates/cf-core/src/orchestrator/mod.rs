//! The instance orchestrator.
//!
//! One struct wires the leaf components and owns the end-to-end flows.
//! Every state-mutating operation runs under the per-instance lock; the
//! backend is injected so tests drive the full flows against a fake.

mod checkpoint;
mod export;
mod lifecycle;
mod reconcile;
mod run;

pub use reconcile::reconcile_status;
pub use run::RunOutcome;

use crate::backend::VmBackend;
use crate::catalog::ImageCatalog;
use crate::instance::MetadataStore;
use cf_blob::BlobStore;
use cf_common::{PortMapping, Result};
use cf_config::Config;
use std::time::Duration;

/// Default host port the gateway is published on.
pub const DEFAULT_GATEWAY_HOST_PORT: u16 = 8090;
/// Gateway port inside the guest.
pub const GATEWAY_GUEST_PORT: u16 = 8080;
/// Package installed in the guest when OpenClaw is absent.
pub const DEFAULT_OPENCLAW_PACKAGE: &str = "openclaw@latest";

/// Per-probe timeout during `ps` reconciliation.
const PS_PROBE_TIMEOUT: Duration = Duration::from_millis(300);
/// Per-probe timeout during the readiness wait.
const READY_PROBE_TIMEOUT: Duration = Duration::from_millis(800);
/// Cadence of readiness polling.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What one gateway probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Any 1xx–4xx answer: the gateway is up and serving.
    Healthy(u16),
    /// 5xx: the gateway process answered but is broken.
    ServerError(u16),
    /// No HTTP answer at all.
    Down(String),
}

/// Loopback HTTP prober for gateway readiness and health.
#[derive(Debug, Clone)]
pub struct GatewayProbe;

impl GatewayProbe {
    pub fn new() -> Self {
        Self
    }

    /// One GET against the published gateway port on loopback.
    pub fn probe(&self, host_port: u16, timeout: Duration) -> ProbeOutcome {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        let url = format!("http://127.0.0.1:{host_port}/");
        match agent.get(&url).call() {
            Ok(resp) => ProbeOutcome::Healthy(resp.status()),
            Err(ureq::Error::Status(code, _)) if code < 500 => ProbeOutcome::Healthy(code),
            Err(ureq::Error::Status(code, _)) => ProbeOutcome::ServerError(code),
            Err(ureq::Error::Transport(t)) => ProbeOutcome::Down(t.to_string()),
        }
    }
}

impl Default for GatewayProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags shared by `new` and `run`.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// A ref, a path to a clawbox file, or `"."`.
    pub input: String,
    /// Name prefix override for per-run identities.
    pub name_override: Option<String>,
    pub workspace: Option<std::path::PathBuf>,
    /// Host port for the gateway forward.
    pub gateway_port: u16,
    /// Extra `host:guest` forwards.
    pub publish: Vec<PortMapping>,
    pub cpus: u32,
    pub memory_mib: u32,
    pub ready_timeout: Duration,
    pub no_wait: bool,
    /// `--volume name:/guest/path` declarations, in order.
    pub volumes: Vec<(String, String)>,
    /// `--run` commands appended to the box's provisioning steps.
    pub run_commands: Vec<String>,
    pub ssh_authorized_keys: Vec<String>,
    pub credentials: crate::preflight::CredentialOverrides,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            input: ".".into(),
            name_override: None,
            workspace: None,
            gateway_port: DEFAULT_GATEWAY_HOST_PORT,
            publish: Vec::new(),
            cpus: 2,
            memory_mib: 2048,
            ready_timeout: Duration::from_secs(120),
            no_wait: false,
            volumes: Vec::new(),
            run_commands: Vec::new(),
            ssh_authorized_keys: Vec::new(),
            credentials: Default::default(),
        }
    }
}

/// Wires config, blob store, catalog, metadata, probe, and backend.
pub struct Orchestrator {
    config: Config,
    blobs: BlobStore,
    store: MetadataStore,
    catalog: ImageCatalog,
    backend: Box<dyn VmBackend>,
    probe: GatewayProbe,
    /// Interactive credential source, when the front-end attached one.
    input: Option<Box<dyn crate::preflight::InputProvider>>,
}

impl Orchestrator {
    pub fn new(config: Config, backend: Box<dyn VmBackend>) -> Result<Self> {
        let blobs = BlobStore::open(config.blobs_dir())?;
        let store = MetadataStore::new(config.claws_dir());
        Ok(Self {
            config,
            blobs,
            store,
            catalog: ImageCatalog::builtin(),
            backend,
            probe: GatewayProbe::new(),
            input: None,
        })
    }

    /// Substitute the catalog (tests, private mirrors).
    pub fn with_catalog(mut self, catalog: ImageCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Attach an interactive credential source.
    pub fn with_input_provider(
        mut self,
        provider: Box<dyn crate::preflight::InputProvider>,
    ) -> Self {
        self.input = Some(provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.store
    }
}
