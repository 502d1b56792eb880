//! Configuration management for the migration engine.
//!
//! Layered loading with priority (highest to lowest):
//! 1. Environment variables (`HERMES__<section>__<key>`)
//! 2. TOML file (default: `config/hermes.toml`, override via `HERMES_CONFIG`)
//! 3. Default values embedded in the structs
//!
//! The `[providers]` table declares the adapters the host process registers
//! at startup; the engine itself only ever resolves provider names.
//!
//! Example:
//!
//! ```toml
//! [store]
//! path = "data/migrations"
//!
//! [worker]
//! workers = 4
//! poll_interval_ms = 100
//!
//! [providers.workspace]
//! kind = "memory"
//!
//! [providers.archive]
//! kind = "local"
//! root = "/srv/hermes/archive"
//! ```

use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::outbox::ReaperConfig;
use crate::provider::{MemoryProvider, ObjectStoreProvider, ProviderRegistry};
use crate::worker::WorkerConfig;

const CONFIG_ENV_VAR: &str = "HERMES_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/hermes.toml";
const ENV_PREFIX: &str = "HERMES";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Provider setup failed: {0}")]
    ProviderError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub outbox: OutboxSettings,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            worker: WorkerSettings::default(),
            outbox: OutboxSettings::default(),
            providers: HashMap::new(),
        }
    }
}

/// Store location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/migrations")
}

/// Worker pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_claim_batch")]
    pub claim_batch: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            claim_batch: default_claim_batch(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_claim_batch() -> usize {
    16
}

/// Outbox reaper settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboxSettings {
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            reaper_interval_secs: default_reaper_interval_secs(),
            claim_timeout_secs: default_claim_timeout_secs(),
        }
    }
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_claim_timeout_secs() -> u64 {
    300
}

/// Provider adapter kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Memory,
    Local,
}

/// One provider registration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Filesystem root for `local` providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Object key prefix (defaults to the provider name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(config_path)
    }

    /// Load configuration from a specific path.
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if config_path.exists() {
            tracing::info!("Loading configuration from: {}", config_path.display());
            builder = builder.add_source(File::from(config_path).required(false));
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults and environment overrides",
                config_path.display()
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.worker.workers,
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            claim_batch: self.worker.claim_batch,
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.outbox.reaper_interval_secs),
            claim_timeout: Duration::from_secs(self.outbox.claim_timeout_secs),
        }
    }

    /// Build the provider registry declared in `[providers]`.
    pub fn build_registry(&self) -> Result<ProviderRegistry, ConfigError> {
        let mut registry = ProviderRegistry::new();

        for (name, provider) in &self.providers {
            match provider.kind {
                ProviderKind::Memory => {
                    registry.register(name.clone(), Arc::new(MemoryProvider::new()));
                }
                ProviderKind::Local => {
                    let root = provider.root.as_ref().ok_or_else(|| {
                        ConfigError::ProviderError(format!(
                            "provider {}: local kind requires a root path",
                            name
                        ))
                    })?;
                    std::fs::create_dir_all(root).map_err(|e| {
                        ConfigError::ProviderError(format!("provider {}: {}", name, e))
                    })?;
                    let store = object_store::local::LocalFileSystem::new_with_prefix(root)
                        .map_err(|e| {
                            ConfigError::ProviderError(format!("provider {}: {}", name, e))
                        })?;
                    let prefix = provider.prefix.clone().unwrap_or_else(|| name.clone());
                    registry.register(
                        name.clone(),
                        Arc::new(ObjectStoreProvider::new(Arc::new(store), prefix)),
                    );
                }
            }
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.store.path, PathBuf::from("data/migrations"));
        assert_eq!(config.worker.workers, 4);
        assert_eq!(config.outbox.claim_timeout_secs, 300);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[store]
path = "/var/lib/hermes"

[worker]
workers = 8
poll_interval_ms = 250

[outbox]
claim_timeout_secs = 120

[providers.workspace]
kind = "memory"

[providers.archive]
kind = "local"
root = "/tmp/hermes-archive"
prefix = "archive"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/hermes"));
        assert_eq!(config.worker.workers, 8);
        assert_eq!(config.worker.poll_interval_ms, 250);
        assert_eq!(config.worker.claim_batch, 16);
        assert_eq!(config.outbox.claim_timeout_secs, 120);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers["workspace"].kind, ProviderKind::Memory);
    }

    #[test]
    fn test_build_registry() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        let archive_root = temp_dir.path().join("archive");

        let toml_content = format!(
            r#"
[providers.workspace]
kind = "memory"

[providers.archive]
kind = "local"
root = "{}"
        "#,
            archive_root.display()
        );

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        let registry = config.build_registry().unwrap();
        assert!(registry.has("workspace"));
        assert!(registry.has("archive"));
    }

    #[test]
    fn test_local_provider_requires_root() {
        let config = Config {
            providers: HashMap::from([(
                "broken".to_string(),
                ProviderConfig {
                    kind: ProviderKind::Local,
                    root: None,
                    prefix: None,
                },
            )]),
            ..Config::default()
        };

        let err = config.build_registry().unwrap_err();
        assert!(matches!(err, ConfigError::ProviderError(_)));
    }

    #[test]
    fn test_worker_and_reaper_conversion() {
        let config = Config::default();
        let worker = config.worker_config();
        assert_eq!(worker.poll_interval, Duration::from_millis(100));
        let reaper = config.reaper_config();
        assert_eq!(reaper.claim_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let mut config = Config::default();
        config.worker.workers = 2;
        config.providers.insert(
            "workspace".to_string(),
            ProviderConfig {
                kind: ProviderKind::Memory,
                root: None,
                prefix: None,
            },
        );

        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.worker.workers, 2);
        assert_eq!(parsed.providers["workspace"].kind, ProviderKind::Memory);
    }
}
