//! Field validators shared by the clawbox reader and the preflight layer.

use once_cell::sync::Lazy;
use regex::Regex;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{2,63}$").expect("name regex"));

static ENV_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("env name regex"));

/// Clawbox `name` field: lowercase, digits, dashes, 3..=64 chars.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Guest environment key: uppercase with digits and underscores.
pub fn is_valid_env_name(name: &str) -> bool {
    ENV_NAME_RE.is_match(name)
}

/// Lowercase 64-hex SHA256 digest string.
pub fn is_valid_sha256(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
