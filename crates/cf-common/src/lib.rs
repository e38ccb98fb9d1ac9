//! Clawfarm shared types.
//!
//! This crate holds the pieces every other clawfarm crate agrees on:
//! - The error taxonomy with stable machine-parseable kinds
//! - Instance identity (`ClawId`) and its validation rules
//! - Field validators for clawbox specs (names, env keys, digests)
//! - The instance status enum and port-mapping pair

pub mod error;
pub mod id;
pub mod status;
pub mod validate;

pub use error::{Error, Result};
pub use id::ClawId;
pub use status::InstanceStatus;
pub use validate::{is_valid_env_name, is_valid_name, is_valid_sha256};

use serde::{Deserialize, Serialize};

/// Clawbox schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// A host-to-guest port forward pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Loopback port on the host.
    pub host: u16,
    /// Port inside the guest.
    pub guest: u16,
}

impl PortMapping {
    pub fn new(host: u16, guest: u16) -> Self {
        Self { host, guest }
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.guest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mapping_display() {
        assert_eq!(PortMapping::new(8080, 80).to_string(), "8080:80");
    }
}
