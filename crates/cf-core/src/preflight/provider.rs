//! Model provider enumeration.
//!
//! The provider is the prefix segment of a `provider/model` spec. The set
//! is closed: an unknown provider is refused at preflight rather than
//! discovered broken inside the guest.

use cf_common::{Error, Result};
use serde::Serialize;

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
    Gemini,
    Grok,
    OpenRouter,
    Zai,
    Ollama,
    LmStudio,
}

impl ModelProvider {
    /// All providers, for flag generation and docs.
    pub const ALL: &'static [ModelProvider] = &[
        ModelProvider::OpenAi,
        ModelProvider::Anthropic,
        ModelProvider::Gemini,
        ModelProvider::Grok,
        ModelProvider::OpenRouter,
        ModelProvider::Zai,
        ModelProvider::Ollama,
        ModelProvider::LmStudio,
    ];

    /// Parse the provider segment of `provider/model`.
    pub fn from_model(model: &str) -> Result<Self> {
        let (provider, rest) = model.split_once('/').ok_or_else(|| {
            Error::InvalidSpec(format!(
                "primary model {model:?} must be provider-prefixed (provider/model)"
            ))
        })?;
        if rest.is_empty() {
            return Err(Error::InvalidSpec(format!(
                "primary model {model:?} names no model after the provider"
            )));
        }
        match provider {
            "openai" => Ok(ModelProvider::OpenAi),
            "anthropic" => Ok(ModelProvider::Anthropic),
            "gemini" => Ok(ModelProvider::Gemini),
            "grok" => Ok(ModelProvider::Grok),
            "openrouter" => Ok(ModelProvider::OpenRouter),
            "zai" => Ok(ModelProvider::Zai),
            "ollama" => Ok(ModelProvider::Ollama),
            "lmstudio" => Ok(ModelProvider::LmStudio),
            other => Err(Error::Unsupported(format!("model provider {other:?}"))),
        }
    }

    /// Env key carrying this provider's API key; `None` for local runtimes.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ModelProvider::OpenAi => Some("OPENAI_API_KEY"),
            ModelProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            ModelProvider::Gemini => Some("GEMINI_API_KEY"),
            ModelProvider::Grok => Some("XAI_API_KEY"),
            ModelProvider::OpenRouter => Some("OPENROUTER_API_KEY"),
            ModelProvider::Zai => Some("ZAI_API_KEY"),
            ModelProvider::Ollama | ModelProvider::LmStudio => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "openai",
            ModelProvider::Anthropic => "anthropic",
            ModelProvider::Gemini => "gemini",
            ModelProvider::Grok => "grok",
            ModelProvider::OpenRouter => "openrouter",
            ModelProvider::Zai => "zai",
            ModelProvider::Ollama => "ollama",
            ModelProvider::LmStudio => "lmstudio",
        }
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers() {
        assert_eq!(
            ModelProvider::from_model("anthropic/claude-sonnet-4").unwrap(),
            ModelProvider::Anthropic
        );
        assert_eq!(
            ModelProvider::from_model("ollama/llama3").unwrap(),
            ModelProvider::Ollama
        );
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = ModelProvider::from_model("watson/quantum-9000").unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[test]
    fn rejects_unprefixed_model() {
        assert_eq!(
            ModelProvider::from_model("gpt-5").unwrap_err().kind(),
            "invalid_spec"
        );
        assert_eq!(
            ModelProvider::from_model("openai/").unwrap_err().kind(),
            "invalid_spec"
        );
    }

    #[test]
    fn local_runtimes_need_no_key() {
        assert_eq!(ModelProvider::Ollama.api_key_env(), None);
        assert_eq!(ModelProvider::LmStudio.api_key_env(), None);
        assert_eq!(
            ModelProvider::OpenAi.api_key_env(),
            Some("OPENAI_API_KEY")
        );
    }
}
