//! Provider presets.
//!
//! This module handles differences between LLM API providers: default
//! endpoints, wire protocol, credential requirements, and which calling
//! conventions each one supports.

use crate::error::ConfigError;

/// Request/response format spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    /// `OpenAI`-style `/chat/completions` (and `/completions`).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
}

/// Static description of a known provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    /// Default API root, including the version segment.
    pub base_url: Option<&'static str>,
    pub protocol: WireProtocol,
    pub requires_key: bool,
    /// Whether completion mode is offered next to chat.
    pub supports_completion: bool,
}

const fn openai_compatible(name: &'static str, base_url: &'static str) -> ProviderPreset {
    ProviderPreset {
        name,
        base_url: Some(base_url),
        protocol: WireProtocol::OpenAi,
        requires_key: true,
        supports_completion: false,
    }
}

/// Providers available out of the box.
pub const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: Some("https://api.openai.com/v1"),
        protocol: WireProtocol::OpenAi,
        requires_key: true,
        supports_completion: true,
    },
    ProviderPreset {
        name: "anthropic",
        base_url: Some("https://api.anthropic.com/v1"),
        protocol: WireProtocol::Anthropic,
        requires_key: true,
        supports_completion: false,
    },
    openai_compatible("groq", "https://api.groq.com/openai/v1"),
    openai_compatible("deepseek", "https://api.deepseek.com/v1"),
    openai_compatible("aliyun", "https://dashscope.aliyuncs.com/compatible-mode/v1"),
    openai_compatible("cohere", "https://api.cohere.ai/compatibility/v1"),
    openai_compatible("openrouter", "https://openrouter.ai/api/v1"),
    openai_compatible("together", "https://api.together.xyz/v1"),
    // Self-hosted servers (vLLM, Ollama, llama.cpp): no default endpoint, key optional.
    ProviderPreset {
        name: "openai-compatible",
        base_url: None,
        protocol: WireProtocol::OpenAi,
        requires_key: false,
        supports_completion: true,
    },
];

impl ProviderPreset {
    /// The endpoint to use: the override if given, else the preset default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when neither is available.
    pub fn resolve_base_url(&self, base_url: Option<&str>) -> Result<String, ConfigError> {
        base_url
            .filter(|u| !u.trim().is_empty())
            .or(self.base_url)
            .map(|u| u.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("provider '{}' requires a base_url", self.name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset(name: &str) -> &'static ProviderPreset {
        PRESETS.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn test_resolve_base_url() {
        let openai = preset("openai");
        assert_eq!(openai.resolve_base_url(None).unwrap(), "https://api.openai.com/v1");
        assert_eq!(
            openai.resolve_base_url(Some("http://proxy:8080/v1/")).unwrap(),
            "http://proxy:8080/v1"
        );

        let generic = preset("openai-compatible");
        assert!(matches!(generic.resolve_base_url(None), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_only_openai_family_offers_completion() {
        let with_completion: Vec<_> = PRESETS
            .iter()
            .filter(|p| p.supports_completion)
            .map(|p| p.name)
            .collect();
        assert_eq!(with_completion, vec!["openai", "openai-compatible"]);
    }
}
