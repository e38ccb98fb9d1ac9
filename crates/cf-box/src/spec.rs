//! The canonical clawbox intent and its validation rules.

use cf_common::{is_valid_env_name, is_valid_name, is_valid_sha256, Error, Result, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Image entry name every clawbox must carry exactly once.
pub const BASE_IMAGE_NAME: &str = "base";

/// URL scheme marking a payload embedded in the archive shape.
pub const EMBEDDED_SCHEME: &str = "clawbox:///";

/// Validated description of what to run.
///
/// Decoding is strict: unknown fields are rejected so that a box written by
/// a newer toolchain fails loudly instead of silently dropping intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClawboxSpec {
    /// Format version; must equal [`SCHEMA_VERSION`].
    pub schema_version: u32,

    /// Stable user-chosen label.
    pub name: String,

    /// Ordered image list; exactly one entry named `base`, optional `run`.
    pub images: Vec<ImageEntry>,

    /// Agent runtime bootstrap requirements.
    #[serde(default)]
    pub openclaw: OpenClawSpec,

    /// Ordered first-boot provisioning scripts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provision: Vec<String>,
}

/// One disk image the instance needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageEntry {
    /// Role of the image (`base`, `run`, or a layer name).
    pub name: String,

    /// Source: a remote URL, a `clawbox:///` path inside the archive, or a
    /// registry-style ref resolved by the image catalog.
    #[serde(rename = "ref")]
    pub source: String,

    /// Expected content digest, lowercase 64-hex.
    pub sha256: String,
}

/// Parsed form of an [`ImageEntry`] source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Fetch from a remote URL via the blob store.
    Remote(String),
    /// Stream out of the archive payload (path inside the archive).
    Embedded(String),
    /// Resolve through the image catalog.
    Catalog(String),
}

impl ImageEntry {
    pub fn parsed_source(&self) -> ImageSource {
        if let Some(path) = self.source.strip_prefix(EMBEDDED_SCHEME) {
            ImageSource::Embedded(path.to_string())
        } else if self.source.starts_with("http://") || self.source.starts_with("https://") {
            ImageSource::Remote(self.source.clone())
        } else {
            ImageSource::Catalog(self.source.clone())
        }
    }
}

/// Gateway authentication mode for the guest agent runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayAuthMode {
    Token,
    Password,
    #[default]
    None,
}

impl std::fmt::Display for GatewayAuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayAuthMode::Token => write!(f, "token"),
            GatewayAuthMode::Password => write!(f, "password"),
            GatewayAuthMode::None => write!(f, "none"),
        }
    }
}

/// OpenClaw bootstrap requirements carried in the box header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OpenClawSpec {
    /// Default model, provider-prefixed (`anthropic/claude-...`).
    pub primary_model: Option<String>,

    /// How the gateway authenticates callers.
    pub gateway_auth_mode: GatewayAuthMode,

    /// Env keys that must resolve before any VM starts.
    pub required_env: Vec<String>,

    /// Env keys passed through when present.
    pub optional_env: Vec<String>,
}

impl ClawboxSpec {
    /// Validate structural and semantic rules common to both shapes.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::Unsupported(format!(
                "clawbox schema_version {} (this build supports {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }

        if !is_valid_name(&self.name) {
            return Err(Error::InvalidSpec(format!(
                "name {:?} must match ^[a-z0-9][a-z0-9-]{{2,63}}$",
                self.name
            )));
        }

        if self.images.is_empty() {
            return Err(Error::InvalidSpec("images must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for image in &self.images {
            if !seen.insert(image.name.as_str()) {
                return Err(Error::InvalidSpec(format!(
                    "duplicate image name {:?}",
                    image.name
                )));
            }
            if !is_valid_sha256(&image.sha256) {
                return Err(Error::InvalidSpec(format!(
                    "image {:?} sha256 must be lowercase 64-hex",
                    image.name
                )));
            }
        }

        let base_count = self
            .images
            .iter()
            .filter(|i| i.name == BASE_IMAGE_NAME)
            .count();
        if base_count != 1 {
            return Err(Error::InvalidSpec(format!(
                "exactly one image named {BASE_IMAGE_NAME:?} required, found {base_count}"
            )));
        }

        for key in self
            .openclaw
            .required_env
            .iter()
            .chain(self.openclaw.optional_env.iter())
        {
            if !is_valid_env_name(key) {
                return Err(Error::InvalidSpec(format!(
                    "env key {key:?} must match ^[A-Z][A-Z0-9_]*$"
                )));
            }
        }

        let required: HashSet<_> = self.openclaw.required_env.iter().collect();
        for key in &self.openclaw.optional_env {
            if required.contains(key) {
                return Err(Error::InvalidSpec(format!(
                    "env key {key:?} listed as both required and optional"
                )));
            }
        }

        Ok(())
    }

    /// The mandatory base image entry. Call after `validate`.
    pub fn base_image(&self) -> Result<&ImageEntry> {
        self.images
            .iter()
            .find(|i| i.name == BASE_IMAGE_NAME)
            .ok_or_else(|| Error::InvalidSpec("missing base image".into()))
    }

    /// Strict parse from a JSON document, unknown fields rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: ClawboxSpec = serde_json::from_str(json)
            .map_err(|e| Error::InvalidSpec(format!("clawspec parse error: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Canonical serialized form (2-space indent, trailing newline).
    pub fn to_canonical_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixtures {
    //! Spec documents shared by tests across the workspace.

    /// A minimal valid header-JSON clawbox document.
    pub fn minimal_spec_json(name: &str) -> String {
        format!(
            r#"{{
  "schema_version": 1,
  "name": "{name}",
  "images": [
    {{
      "name": "base",
      "ref": "https://images.example/noble.img",
      "sha256": "{digest}"
    }}
  ],
  "openclaw": {{
    "primary_model": "anthropic/claude-sonnet-4",
    "gateway_auth_mode": "none",
    "required_env": [],
    "optional_env": []
  }}
}}
"#,
            digest = "ab".repeat(32),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::minimal_spec_json;
    use super::*;

    fn valid_spec() -> ClawboxSpec {
        ClawboxSpec::from_json(&minimal_spec_json("demo-openclaw")).unwrap()
    }

    #[test]
    fn parses_minimal_spec() {
        let spec = valid_spec();
        assert_eq!(spec.name, "demo-openclaw");
        assert_eq!(spec.images.len(), 1);
        assert_eq!(spec.openclaw.gateway_auth_mode, GatewayAuthMode::None);
    }

    #[test]
    fn canonical_roundtrip_is_identity() {
        let spec = valid_spec();
        let json = spec.to_canonical_json().unwrap();
        let again = ClawboxSpec::from_json(&json).unwrap();
        assert_eq!(spec, again);
        // Serializing the reparse reproduces the same bytes.
        assert_eq!(json, again.to_canonical_json().unwrap());
    }

    #[test]
    fn rejects_unknown_fields() {
        let json = minimal_spec_json("demo-openclaw").replace(
            "\"schema_version\": 1,",
            "\"schema_version\": 1,\n  \"surprise\": true,",
        );
        let err = ClawboxSpec::from_json(&json).unwrap_err();
        assert_eq!(err.kind(), "invalid_spec");
    }

    #[test]
    fn rejects_wrong_schema_version() {
        let json = minimal_spec_json("demo-openclaw")
            .replace("\"schema_version\": 1", "\"schema_version\": 9");
        let err = ClawboxSpec::from_json(&json).unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[test]
    fn rejects_missing_base_image() {
        let mut spec = valid_spec();
        spec.images[0].name = "run".into();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("base"));
    }

    #[test]
    fn rejects_duplicate_image_names() {
        let mut spec = valid_spec();
        let dup = spec.images[0].clone();
        spec.images.push(dup);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_uppercase_sha() {
        let mut spec = valid_spec();
        spec.images[0].sha256 = "AB".repeat(32);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_bad_env_names_and_overlap() {
        let mut spec = valid_spec();
        spec.openclaw.required_env = vec!["lower_case".into()];
        assert!(spec.validate().is_err());

        let mut spec = valid_spec();
        spec.openclaw.required_env = vec!["SHARED_KEY".into()];
        spec.openclaw.optional_env = vec!["SHARED_KEY".into()];
        assert!(spec.validate().is_err());
    }

    #[test]
    fn source_parsing() {
        let entry = |source: &str| ImageEntry {
            name: "base".into(),
            source: source.into(),
            sha256: "ab".repeat(32),
        };
        assert_eq!(
            entry("clawbox:///run.qcow2").parsed_source(),
            ImageSource::Embedded("run.qcow2".into())
        );
        assert_eq!(
            entry("https://x.example/a.img").parsed_source(),
            ImageSource::Remote("https://x.example/a.img".into())
        );
        assert_eq!(
            entry("ubuntu-24.04").parsed_source(),
            ImageSource::Catalog("ubuntu-24.04".into())
        );
    }
}
