//! Instance identity.
//!
//! A CLAWID names one VM instance and doubles as its directory name under
//! `<home>/claws/`. Two construction modes exist: a stable identity derived
//! from the artifact file (header-JSON boxes) and a random identity minted
//! per run (archive boxes and ref-only runs). Derivation lives next to the
//! artifact reader; this type only enforces the shape.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static CLAWID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{2,127}$").expect("clawid regex"));

/// Validated runtime identity of a single VM instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClawId(String);

impl ClawId {
    /// Parse and validate a CLAWID string.
    pub fn parse(s: &str) -> Result<Self> {
        if !CLAWID_RE.is_match(s) {
            return Err(Error::InvalidSpec(format!(
                "invalid instance id {s:?}: must match ^[a-z0-9][a-z0-9-]{{2,127}}$"
            )));
        }
        Ok(ClawId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ClawId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ClawId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ClawId::parse(s)
    }
}
