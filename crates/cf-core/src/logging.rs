//! Structured logging foundation.
//!
//! stdout is reserved for command payloads (tables, JSON); all log output
//! goes to stderr. Format and level come from the environment:
//! `CLAWFARM_LOG` (falling back to `RUST_LOG`) selects the filter,
//! `CLAWFARM_LOG_FORMAT=json` switches the human console format to JSONL
//! for agent-driven use.

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const ENV_LOG: &str = "CLAWFARM_LOG";
const ENV_LOG_FORMAT: &str = "CLAWFARM_LOG_FORMAT";

/// Initialize the logging subsystem. Call once at startup.
pub fn init_logging() {
    let filter = std::env::var(ENV_LOG)
        .ok()
        .and_then(|v| v.parse::<EnvFilter>().ok())
        .unwrap_or_else(|| {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cf_core=info"))
        });

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        tracing_subscriber::registry().with(filter).with(layer).init();
    } else {
        let use_ansi = std::io::stderr().is_terminal();
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(use_ansi)
            .without_time();
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}
