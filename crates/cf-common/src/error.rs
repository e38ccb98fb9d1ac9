//! Error taxonomy for clawfarm.
//!
//! Every failure in the runtime maps to exactly one kind. The kind string is
//! a stable contract: the CLI prints it as the prefix of every error line
//! (`sha256_mismatch: ...`), and automation is expected to dispatch on it
//! rather than on message text.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for clawfarm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the clawfarm runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Another operation holds the per-instance lock.
    #[error("instance {id} is busy (another clawfarm operation holds its lock)")]
    Busy { id: String },

    /// The instance was previously started from a different source.
    #[error("instance {id} was created from {recorded}, refusing {requested}")]
    SourceConflict {
        id: String,
        recorded: String,
        requested: String,
    },

    /// Downloaded or embedded bytes failed digest verification.
    #[error("sha256 mismatch for {label}: expected {expected}, got {actual}")]
    Sha256Mismatch {
        label: String,
        expected: String,
        actual: String,
    },

    /// Instance, checkpoint, or image ref does not resolve.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Operation requires clawbox provenance the instance does not have.
    #[error("instance {id} was not started from a clawbox file")]
    NotClawboxBacked { id: String },

    /// Structural or semantic clawspec violation.
    #[error("invalid clawbox spec: {0}")]
    InvalidSpec(String),

    /// One or more required credentials or env keys did not resolve.
    #[error("missing required input: {}", keys.join(", "))]
    MissingRequiredInput { keys: Vec<String> },

    /// Unsupported provider, architecture, or schema version.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Port outside 1..=65535.
    #[error("invalid port {port}")]
    InvalidPort { port: u32 },

    /// Same host port forwarded to two different guest ports.
    #[error("host port {host} maps to both guest {first_guest} and guest {second_guest}")]
    DuplicateHostPort {
        host: u16,
        first_guest: u16,
        second_guest: u16,
    },

    /// `.` matched more than one clawbox file.
    #[error("ambiguous source: {} contains {} clawbox files", .dir.display(), .matches.len())]
    AmbiguousSource { dir: PathBuf, matches: Vec<PathBuf> },

    /// Readiness deadline exceeded; the VM is still running.
    #[error(
        "instance {id} gateway did not become ready within {waited_secs}s (serial log: {})",
        .serial_log.display()
    )]
    Unreachable {
        id: String,
        waited_secs: u64,
        serial_log: PathBuf,
    },

    /// The VM backend failed to start, stop, or signal a process.
    #[error("backend error: {0}")]
    Backend(String),

    /// Transport-level failure during a download or probe.
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-200 status.
    #[error("http {code} fetching {url}")]
    Http { code: u16, url: String },

    /// Export blocked because the artifact contains secret-shaped bytes.
    #[error("{count} potential secret(s) detected in source (first: {first}); pass --allow-secrets to export anyway")]
    SecretDetected { count: usize, first: String },

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure on a runtime file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable snake_case kind for machine dispatch and CLI prefixes.
    pub fn kind(&self) -> String {
        match self {
            Error::Busy { .. } => "busy".into(),
            Error::SourceConflict { .. } => "source_conflict".into(),
            Error::Sha256Mismatch { .. } => "sha256_mismatch".into(),
            Error::NotFound { .. } => "not_found".into(),
            Error::NotClawboxBacked { .. } => "not_clawbox_backed".into(),
            Error::InvalidSpec(_) => "invalid_spec".into(),
            Error::MissingRequiredInput { .. } => "missing_required_input".into(),
            Error::Unsupported(_) => "unsupported".into(),
            Error::InvalidPort { .. } => "invalid_port".into(),
            Error::DuplicateHostPort { .. } => "duplicate_host_port".into(),
            Error::AmbiguousSource { .. } => "ambiguous_source".into(),
            Error::Unreachable { .. } => "unreachable".into(),
            Error::Backend(_) => "backend".into(),
            Error::Network(_) => "network".into(),
            Error::Http { code, .. } => format!("http_{code}"),
            Error::SecretDetected { .. } => "secret_detected".into(),
            Error::Io(_) => "io".into(),
            Error::Json(_) => "io".into(),
        }
    }

    /// True when the caller may retry without changing anything.
    ///
    /// `busy` clears when the competing operation finishes; network and I/O
    /// failures are often transient. Everything else needs user action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Busy { .. } | Error::Network(_) | Error::Io(_) | Error::Http { .. }
        )
    }

    /// Shorthand for a `not_found` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    /// Format for CLI stderr: `<kind>: <message>`.
    pub fn to_cli_string(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Error::Busy { id: "x".into() }.kind(), "busy");
        assert_eq!(
            Error::Sha256Mismatch {
                label: "base".into(),
                expected: "aa".into(),
                actual: "bb".into(),
            }
            .kind(),
            "sha256_mismatch"
        );
        assert_eq!(
            Error::Http {
                code: 404,
                url: "http://x".into()
            }
            .kind(),
            "http_404"
        );
        assert_eq!(Error::not_found("image ref ubuntu-99").kind(), "not_found");
    }

    #[test]
    fn cli_string_has_kind_prefix() {
        let err = Error::InvalidSpec("no base image".into());
        let s = err.to_cli_string();
        assert!(s.starts_with("invalid_spec: "), "got: {s}");
    }

    #[test]
    fn missing_input_lists_every_key() {
        let err = Error::MissingRequiredInput {
            keys: vec!["OPENAI_API_KEY".into(), "CUSTOM_TOKEN".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("OPENAI_API_KEY"));
        assert!(msg.contains("CUSTOM_TOKEN"));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Busy { id: "a".into() }.is_transient());
        assert!(!Error::InvalidSpec("x".into()).is_transient());
        assert!(!Error::SecretDetected {
            count: 1,
            first: "aws_access_key".into()
        }
        .is_transient());
    }
}
