//! Layered application configuration.
//!
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. config file (`--config` / `CONFIG_FILE`, else `./config.yaml` if present)
//! 3. `MEMLOOM_` environment variables, `__` between sections
//!    (`MEMLOOM_MEMORY__BASE_URL`)
//! 4. direct variables shared with other deployments (`LLM_PROVIDER`,
//!    `LLM_MODEL`, `LLM_API_KEY`, `LLM_BASE_URL`, `LLM_MODEL_TYPE`,
//!    `MEM0_API_KEY`, `MEM0_BASE_URL`)
//! 5. CLI flags

use std::env;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::llm::{BackendSettings, ModelMode};
use crate::memory::client::MemoryClientSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Generation provider (openai, anthropic, groq, ...)
    #[arg(long)]
    pub provider: Option<String>,

    /// Generation model
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub memory: MemoryConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub search_path: String,
    pub add_path: String,
    pub default_top_k: usize,
    pub search_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub mode: Option<ModelMode>,
    pub max_tokens: u32,
    #[serde(default)]
    pub anthropic_version: Option<String>,
}

/// Direct environment variables and the keys they override.
const DIRECT_ENV: &[(&str, &str)] = &[
    ("LLM_PROVIDER", "generation.provider"),
    ("LLM_MODEL", "generation.model"),
    ("LLM_API_KEY", "generation.api_key"),
    ("LLM_BASE_URL", "generation.base_url"),
    ("LLM_MODEL_TYPE", "generation.mode"),
    ("MEM0_API_KEY", "memory.api_key"),
    ("MEM0_BASE_URL", "memory.base_url"),
];

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("memory.base_url", "http://localhost:8000")?
            .set_default("memory.search_path", "/search/")?
            .set_default("memory.add_path", "/memories/")?
            .set_default("memory.default_top_k", 5)?
            .set_default("memory.search_retries", 2)?
            .set_default("memory.retry_backoff_ms", 200)?
            .set_default("memory.timeout_secs", 60)?
            .set_default("memory.queue_capacity", 256)?
            .set_default("generation.provider", "openai")?
            .set_default("generation.model", "gpt-4o-mini")?
            .set_default("generation.max_tokens", 1024)?;

        // 2. Config file
        match &cli.config {
            Some(path) => builder = builder.add_source(File::with_name(path)),
            None if Path::new("config.yaml").exists() => {
                builder = builder.add_source(File::with_name("config.yaml"));
            }
            None => {}
        }

        // 3. Prefixed environment, e.g. MEMLOOM_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("MEMLOOM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Direct environment
        for (var, key) in DIRECT_ENV {
            let Ok(val) = env::var(var) else { continue };
            let val = val.trim();
            if val.is_empty() {
                continue;
            }
            let val = if key.ends_with("mode") {
                val.to_lowercase()
            } else {
                val.to_string()
            };
            builder = builder.set_override(*key, val)?;
        }

        // 5. CLI overrides
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(provider) = cli.provider {
            builder = builder.set_override("generation.provider", provider)?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("generation.model", model)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

impl MemoryConfig {
    /// Settings for [`HttpMemoryClient`](crate::memory::HttpMemoryClient).
    pub fn client_settings(&self) -> MemoryClientSettings {
        MemoryClientSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            search_path: self.search_path.clone(),
            add_path: self.add_path.clone(),
            search_retries: self.search_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl GenerationConfig {
    /// Settings for [`ProviderRegistry::build`](crate::llm::ProviderRegistry::build).
    pub fn backend_settings(&self) -> BackendSettings {
        let mut settings = BackendSettings::new(&self.provider, &self.model);
        settings.api_key = self.api_key.clone().filter(|k| !k.trim().is_empty());
        settings.base_url = self.base_url.clone().filter(|u| !u.trim().is_empty());
        settings.mode = self.mode;
        settings.max_tokens = Some(self.max_tokens);
        settings.api_version.clone_from(&self.anthropic_version);
        settings
    }
}
