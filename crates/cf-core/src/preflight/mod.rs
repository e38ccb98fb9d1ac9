//! OpenClaw preflight and credential resolution.
//!
//! Gathers every input the guest needs and fails fast before any long
//! operation: no download, no disk copy, no VM while a required value is
//! unresolved. Sources merge in precedence order (highest first):
//!
//! 1. Explicit per-parameter flags (provider keys, gateway token/password)
//! 2. Repeated `--openclaw-env KEY=VALUE`
//! 3. An env-file (`KEY=VALUE` lines, `#` comments, optional `export `)
//! 4. An explicit config file, merged under the generated JSON
//! 5. Clawbox header defaults (primary model, gateway auth mode)

pub mod prompt;
pub mod provider;

pub use prompt::InputProvider;
pub use provider::ModelProvider;

use cf_box::{GatewayAuthMode, OpenClawSpec};
use cf_common::{is_valid_env_name, Error, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Env key the gateway reads its bearer token from.
pub const GATEWAY_TOKEN_ENV: &str = "OPENCLAW_GATEWAY_TOKEN";
/// Env key the gateway reads its password from.
pub const GATEWAY_PASSWORD_ENV: &str = "OPENCLAW_GATEWAY_PASSWORD";

/// Label used when prompting for the model itself.
const PRIMARY_MODEL_LABEL: &str = "primary model";

/// Credential-bearing flags collected by the CLI.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub primary_model: Option<String>,
    pub gateway_auth_mode: Option<GatewayAuthMode>,
    pub gateway_token: Option<String>,
    pub gateway_password: Option<String>,
    /// Per-provider API keys from `--openclaw-<provider>-api-key`.
    pub provider_api_keys: BTreeMap<ModelProvider, String>,
    /// Repeated `--openclaw-env KEY=VALUE`, in flag order.
    pub env: Vec<(String, String)>,
    pub env_file: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

/// Everything preflight guarantees to be present and valid.
#[derive(Debug, Clone)]
pub struct ResolvedOpenClaw {
    pub primary_model: String,
    pub provider: ModelProvider,
    pub gateway_auth_mode: GatewayAuthMode,
    /// Final guest env map, validated names, no empty required values.
    pub env: BTreeMap<String, String>,
    /// Generated configuration JSON (config-file merged underneath).
    pub config_json: String,
}

/// Resolve and validate every guest input.
///
/// With `input` attached, each missing value is requested individually;
/// without it, one `missing_required_input` error enumerates all of them.
pub fn resolve(
    spec: &OpenClawSpec,
    overrides: &CredentialOverrides,
    input: Option<&dyn InputProvider>,
) -> Result<ResolvedOpenClaw> {
    let mut env = BTreeMap::new();

    // Lowest precedence first; later inserts overwrite.
    if let Some(env_file) = &overrides.env_file {
        let content = fs::read_to_string(env_file)?;
        for (key, value) in parse_env_file(&content)? {
            env.insert(key, value);
        }
    }
    for (key, value) in &overrides.env {
        check_env_name(key)?;
        env.insert(key.clone(), value.clone());
    }
    for (provider, key_value) in &overrides.provider_api_keys {
        if let Some(env_key) = provider.api_key_env() {
            env.insert(env_key.to_string(), key_value.clone());
        }
    }
    if let Some(token) = &overrides.gateway_token {
        env.insert(GATEWAY_TOKEN_ENV.to_string(), token.clone());
    }
    if let Some(password) = &overrides.gateway_password {
        env.insert(GATEWAY_PASSWORD_ENV.to_string(), password.clone());
    }

    let mut missing: Vec<String> = Vec::new();
    let gateway_auth_mode = overrides
        .gateway_auth_mode
        .unwrap_or(spec.gateway_auth_mode);

    // Primary model: flag beats clawbox default.
    let mut primary_model = overrides
        .primary_model
        .clone()
        .or_else(|| spec.primary_model.clone());
    if primary_model.is_none() {
        if let Some(provider) = input {
            let answer = provider
                .provide(PRIMARY_MODEL_LABEL, false)
                .unwrap_or_default();
            if !answer.trim().is_empty() {
                primary_model = Some(answer.trim().to_string());
            }
        }
    }
    let Some(primary_model) = primary_model else {
        // Without a model there is no provider to derive further
        // requirements from; report everything else we can still check.
        missing.push(PRIMARY_MODEL_LABEL.to_string());
        match gateway_auth_mode {
            GatewayAuthMode::Token => {
                collect_missing_env(&[GATEWAY_TOKEN_ENV.to_string()], &env, &mut missing)
            }
            GatewayAuthMode::Password => {
                collect_missing_env(&[GATEWAY_PASSWORD_ENV.to_string()], &env, &mut missing)
            }
            GatewayAuthMode::None => {}
        }
        collect_missing_env(&spec.required_env, &env, &mut missing);
        return Err(Error::MissingRequiredInput { keys: missing });
    };

    let model_provider = ModelProvider::from_model(&primary_model)?;

    // Derived requirements, checked in a stable order.
    let mut required: Vec<&str> = Vec::new();
    if let Some(key) = model_provider.api_key_env() {
        required.push(key);
    }
    match gateway_auth_mode {
        GatewayAuthMode::Token => required.push(GATEWAY_TOKEN_ENV),
        GatewayAuthMode::Password => required.push(GATEWAY_PASSWORD_ENV),
        GatewayAuthMode::None => {}
    }
    for key in &spec.required_env {
        if !required.contains(&key.as_str()) {
            required.push(key);
        }
    }

    for key in required {
        if env.get(key).map(|v| !v.is_empty()).unwrap_or(false) {
            continue;
        }
        if let Some(provider) = input {
            if let Ok(value) = provider.provide(key, true) {
                if !value.is_empty() {
                    env.insert(key.to_string(), value);
                    continue;
                }
            }
        }
        missing.push(key.to_string());
    }

    if !missing.is_empty() {
        return Err(Error::MissingRequiredInput { keys: missing });
    }

    for key in env.keys() {
        check_env_name(key)?;
    }

    let config_json = build_config_json(
        &primary_model,
        gateway_auth_mode,
        overrides.config_file.as_deref(),
    )?;

    debug!(
        model = %primary_model,
        provider = %model_provider,
        auth = %gateway_auth_mode,
        env_keys = env.len(),
        "preflight resolved"
    );

    Ok(ResolvedOpenClaw {
        primary_model,
        provider: model_provider,
        gateway_auth_mode,
        env,
        config_json,
    })
}

fn collect_missing_env(
    required: &[String],
    env: &BTreeMap<String, String>,
    missing: &mut Vec<String>,
) {
    for key in required {
        if !env.get(key).map(|v| !v.is_empty()).unwrap_or(false) {
            missing.push(key.clone());
        }
    }
}

fn check_env_name(key: &str) -> Result<()> {
    if !is_valid_env_name(key) {
        return Err(Error::InvalidSpec(format!(
            "env key {key:?} must match ^[A-Z][A-Z0-9_]*$"
        )));
    }
    Ok(())
}

/// Parse `KEY=VALUE` lines: `#` comments, blank lines, optional `export `
/// prefix, one matching pair of surrounding quotes stripped.
pub fn parse_env_file(content: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::InvalidSpec(format!(
                "env file line {}: expected KEY=VALUE, got {raw:?}",
                lineno + 1
            )));
        };
        let key = key.trim();
        check_env_name(key)?;
        out.push((key.to_string(), unquote(value.trim()).to_string()));
    }
    Ok(out)
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Generated config with an explicit config file merged underneath.
fn build_config_json(
    primary_model: &str,
    auth_mode: GatewayAuthMode,
    config_file: Option<&std::path::Path>,
) -> Result<String> {
    let generated = json!({
        "model": { "primary": primary_model },
        "gateway": { "auth_mode": auth_mode.to_string() },
    });

    let merged = match config_file {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            let base: Value = serde_json::from_str(&content).map_err(|e| {
                Error::InvalidSpec(format!("config file {}: {e}", path.display()))
            })?;
            merge_json(base, generated)
        }
        None => generated,
    };

    let mut out = serde_json::to_string_pretty(&merged)?;
    out.push('\n');
    Ok(out)
}

/// Overlay wins over base, recursively for objects.
fn merge_json(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_json(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::prompt::ScriptedInput;
    use super::*;

    fn spec_requiring(keys: &[&str]) -> OpenClawSpec {
        OpenClawSpec {
            primary_model: Some("openai/gpt-5".into()),
            gateway_auth_mode: GatewayAuthMode::None,
            required_env: keys.iter().map(|s| s.to_string()).collect(),
            optional_env: vec![],
        }
    }

    fn with_key(provider: ModelProvider, value: &str) -> CredentialOverrides {
        let mut overrides = CredentialOverrides::default();
        overrides.provider_api_keys.insert(provider, value.into());
        overrides
    }

    #[test]
    fn resolves_with_provider_key_flag() {
        let resolved = resolve(
            &spec_requiring(&[]),
            &with_key(ModelProvider::OpenAi, "test-key"),
            None,
        )
        .unwrap();
        assert_eq!(resolved.provider, ModelProvider::OpenAi);
        assert_eq!(resolved.env.get("OPENAI_API_KEY").unwrap(), "test-key");
        assert!(resolved.config_json.contains("openai/gpt-5"));
    }

    #[test]
    fn missing_inputs_are_aggregated() {
        let err = resolve(
            &spec_requiring(&["CUSTOM_REQUIRED_TOKEN", "ANOTHER_ONE"]),
            &CredentialOverrides::default(),
            None,
        )
        .unwrap_err();
        let Error::MissingRequiredInput { keys } = &err else {
            panic!("wrong error: {err}");
        };
        assert!(keys.contains(&"OPENAI_API_KEY".to_string()));
        assert!(keys.contains(&"CUSTOM_REQUIRED_TOKEN".to_string()));
        assert!(keys.contains(&"ANOTHER_ONE".to_string()));
    }

    #[test]
    fn flag_beats_env_file_beats_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("creds.env");
        std::fs::write(
            &env_file,
            "# creds\nexport OPENAI_API_KEY=from-file\nEXTRA_KEY='kept'\n",
        )
        .unwrap();

        let mut overrides = with_key(ModelProvider::OpenAi, "from-flag");
        overrides.env_file = Some(env_file);
        let resolved = resolve(&spec_requiring(&[]), &overrides, None).unwrap();
        assert_eq!(resolved.env.get("OPENAI_API_KEY").unwrap(), "from-flag");
        assert_eq!(resolved.env.get("EXTRA_KEY").unwrap(), "kept");
    }

    #[test]
    fn repeated_env_beats_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("creds.env");
        std::fs::write(&env_file, "OPENAI_API_KEY=from-file\n").unwrap();

        let mut overrides = CredentialOverrides::default();
        overrides.env_file = Some(env_file);
        overrides.env = vec![("OPENAI_API_KEY".into(), "from-repeat".into())];
        let resolved = resolve(&spec_requiring(&[]), &overrides, None).unwrap();
        assert_eq!(resolved.env.get("OPENAI_API_KEY").unwrap(), "from-repeat");
    }

    #[test]
    fn gateway_token_mode_requires_token() {
        let mut spec = spec_requiring(&[]);
        spec.gateway_auth_mode = GatewayAuthMode::Token;
        spec.primary_model = Some("ollama/llama3".into());

        let err = resolve(&spec, &CredentialOverrides::default(), None).unwrap_err();
        let Error::MissingRequiredInput { keys } = &err else {
            panic!("wrong error: {err}");
        };
        assert_eq!(keys, &vec![GATEWAY_TOKEN_ENV.to_string()]);

        let mut overrides = CredentialOverrides::default();
        overrides.gateway_token = Some("tok".into());
        let resolved = resolve(&spec, &overrides, None).unwrap();
        assert_eq!(resolved.env.get(GATEWAY_TOKEN_ENV).unwrap(), "tok");
    }

    #[test]
    fn none_mode_needs_no_gateway_secret() {
        let mut spec = spec_requiring(&[]);
        spec.primary_model = Some("lmstudio/qwen".into());
        let resolved = resolve(&spec, &CredentialOverrides::default(), None).unwrap();
        assert!(resolved.env.is_empty());
    }

    #[test]
    fn interactive_provider_rescues_missing_values() {
        let input = ScriptedInput::new(&[("OPENAI_API_KEY", "typed-in")]);
        let resolved = resolve(
            &spec_requiring(&[]),
            &CredentialOverrides::default(),
            Some(&input),
        )
        .unwrap();
        assert_eq!(resolved.env.get("OPENAI_API_KEY").unwrap(), "typed-in");
    }

    #[test]
    fn interactive_provider_can_supply_model() {
        let mut spec = spec_requiring(&[]);
        spec.primary_model = None;
        let input = ScriptedInput::new(&[("primary model", "ollama/llama3")]);
        let resolved = resolve(&spec, &CredentialOverrides::default(), Some(&input)).unwrap();
        assert_eq!(resolved.primary_model, "ollama/llama3");
        assert_eq!(resolved.provider, ModelProvider::Ollama);
    }

    #[test]
    fn missing_model_without_input_names_it() {
        let mut spec = spec_requiring(&["CUSTOM_TOKEN"]);
        spec.primary_model = None;
        let err = resolve(&spec, &CredentialOverrides::default(), None).unwrap_err();
        let Error::MissingRequiredInput { keys } = &err else {
            panic!("wrong error: {err}");
        };
        assert!(keys.contains(&"primary model".to_string()));
        assert!(keys.contains(&"CUSTOM_TOKEN".to_string()));
    }

    #[test]
    fn unsupported_provider_is_refused() {
        let mut overrides = CredentialOverrides::default();
        overrides.primary_model = Some("watson/q".into());
        let err = resolve(&spec_requiring(&[]), &overrides, None).unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let overrides = with_key(ModelProvider::OpenAi, "");
        let err = resolve(&spec_requiring(&[]), &overrides, None).unwrap_err();
        assert_eq!(err.kind(), "missing_required_input");
    }

    #[test]
    fn env_file_parsing_rules() {
        let parsed = parse_env_file(
            "# comment\n\nexport A_KEY=plain\nB_KEY=\"double\"\nC_KEY='single'\nD_KEY=tr=icky\n",
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                ("A_KEY".to_string(), "plain".to_string()),
                ("B_KEY".to_string(), "double".to_string()),
                ("C_KEY".to_string(), "single".to_string()),
                ("D_KEY".to_string(), "tr=icky".to_string()),
            ]
        );

        assert!(parse_env_file("no equals sign").is_err());
        assert!(parse_env_file("lower=case").is_err());
    }

    #[test]
    fn config_file_merges_under_generated() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("openclaw.json");
        std::fs::write(
            &config,
            r#"{"gateway": {"auth_mode": "overridden-below", "cors": true}, "extra": 1}"#,
        )
        .unwrap();

        let mut overrides = with_key(ModelProvider::OpenAi, "k");
        overrides.config_file = Some(config);
        let resolved = resolve(&spec_requiring(&[]), &overrides, None).unwrap();

        let value: Value = serde_json::from_str(&resolved.config_json).unwrap();
        // Generated fields win; file-only fields survive.
        assert_eq!(value["gateway"]["auth_mode"], "none");
        assert_eq!(value["gateway"]["cors"], true);
        assert_eq!(value["extra"], 1);
        assert_eq!(value["model"]["primary"], "openai/gpt-5");
    }
}
