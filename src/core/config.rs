use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::llm::registry::ProviderProfile;

pub const CONFIG_FILE: &str = "codetrail.toml";

/// Environment override for the active provider name.
pub const PROVIDER_ENV: &str = "CODETRAIL_PROVIDER";

/// Application configuration, layered: built-in defaults, then
/// `codetrail.toml`, then environment overrides. Secrets never appear
/// here; provider profiles reference them by environment variable name.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "default_active_provider")]
    pub active_provider: String,

    /// Extra provider profiles layered over the built-in table.
    #[serde(default)]
    pub providers: HashMap<String, ProviderProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for per-job output trees.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_active_provider() -> String {
    "gemini".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7520
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("web_outputs")
}
fn default_cache_file() -> PathBuf {
    PathBuf::from("llm_cache.json")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            active_provider: default_active_provider(),
            providers: HashMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_file: default_cache_file(),
            log_dir: default_log_dir(),
        }
    }
}

impl AppConfig {
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let config_path = dir.as_ref().join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("reading {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?
        } else {
            info!("no {CONFIG_FILE} found, using defaults");
            Self::default()
        };

        if let Ok(name) = std::env::var(PROVIDER_ENV) {
            let name = name.trim().to_lowercase();
            if !name.is_empty() {
                config.active_provider = name;
            }
        }

        Ok(config)
    }
}
