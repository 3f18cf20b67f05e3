//! Provider name → backend factory table.
//!
//! The registry is the only place that knows which provider names exist.
//! [`ProviderRegistry::build`] turns [`BackendSettings`] into a backend or a
//! [`ConfigError`]; no network call is made either way.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ConfigError;

use super::provider::{PRESETS, ProviderPreset, WireProtocol};
use super::{
    AnthropicDriver, BackendSettings, ChatCompletionsDriver, CompletionsDriver, GenerationBackend,
    ModelMode,
};

/// Builds a backend from settings.
pub trait BackendFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the settings are not usable for this provider.
    fn create(&self, settings: &BackendSettings) -> Result<Arc<dyn GenerationBackend>, ConfigError>;
}

impl<F> BackendFactory for F
where
    F: Fn(&BackendSettings) -> Result<Arc<dyn GenerationBackend>, ConfigError> + Send + Sync,
{
    fn create(&self, settings: &BackendSettings) -> Result<Arc<dyn GenerationBackend>, ConfigError> {
        self(settings)
    }
}

/// Factory for a built-in [`ProviderPreset`].
struct PresetFactory(&'static ProviderPreset);

impl BackendFactory for PresetFactory {
    fn create(&self, settings: &BackendSettings) -> Result<Arc<dyn GenerationBackend>, ConfigError> {
        let preset = self.0;

        if preset.requires_key && settings.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingCredential {
                provider: preset.name.to_string(),
            });
        }
        let base_url = preset.resolve_base_url(settings.base_url.as_deref())?;

        let backend: Arc<dyn GenerationBackend> = match (preset.protocol, settings.mode) {
            (WireProtocol::OpenAi, None | Some(ModelMode::Chat)) => {
                Arc::new(ChatCompletionsDriver::new(settings, base_url))
            }
            (WireProtocol::OpenAi, Some(ModelMode::Completion)) if preset.supports_completion => {
                Arc::new(CompletionsDriver::new(settings, base_url))
            }
            (WireProtocol::Anthropic, None | Some(ModelMode::Chat)) => {
                Arc::new(AnthropicDriver::new(settings, base_url)?)
            }
            (_, Some(mode)) => {
                return Err(ConfigError::UnsupportedMode {
                    provider: preset.name.to_string(),
                    mode: mode.to_string(),
                });
            }
        };
        Ok(backend)
    }
}

/// Registry of generation providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn BackendFactory>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in preset.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for preset in PRESETS {
            registry
                .factories
                .insert(preset.name.to_string(), Arc::new(PresetFactory(preset)));
        }
        registry
    }

    /// Register (or replace) a provider.
    pub fn register(&mut self, name: impl Into<String>, factory: impl BackendFactory + 'static) -> &mut Self {
        self.factories
            .insert(name.into().to_lowercase(), Arc::new(factory));
        self
    }

    /// Build the backend named by `settings.provider`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownProvider`] for names not in the registry
    /// - [`ConfigError::Invalid`] for an empty model
    /// - whatever the provider's factory rejects
    pub fn build(&self, settings: &BackendSettings) -> Result<Arc<dyn GenerationBackend>, ConfigError> {
        let factory = self
            .factories
            .get(&settings.provider.to_lowercase())
            .ok_or_else(|| ConfigError::UnknownProvider(settings.provider.clone()))?;

        if settings.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }

        let backend = factory.create(settings)?;
        tracing::debug!(
            provider = %settings.provider,
            model = %settings.model,
            mode = ?settings.mode,
            "Generation backend ready"
        );
        Ok(backend)
    }
}
