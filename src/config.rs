//! TOML configuration for `chidx`.
//!
//! Every section except `[db]` and `[source]` has defaults. Secrets are
//! never read from the file: the replica key lives in the environment
//! variable named by `replica.key_env`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::IndexError;
use crate::source::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub replica: Option<ReplicaConfig>,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retention_years")]
    pub retention_years: u32,
    #[serde(default)]
    pub default_chat_id: Option<i64>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retention_years: default_retention_years(),
            default_chat_id: None,
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
        }
    }
}

impl IngestConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_attempts,
            initial_delay: Duration::from_millis(self.connect_backoff_ms),
            backoff_factor: 2,
        }
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_retention_years() -> u32 {
    3
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub export_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplicaConfig {
    pub url: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_table() -> String {
    "messages".to_string()
}
fn default_key_env() -> String {
    "SUPABASE_SERVICE_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl ReplicaConfig {
    /// Read the service key from the environment.
    pub fn service_key(&self) -> Result<String, IndexError> {
        match std::env::var(&self.key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(IndexError::Configuration(format!(
                "{} must be set in the environment",
                self.key_env
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
        }
    }
}

fn default_search_limit() -> i64 {
    20
}

impl Config {
    /// Resolve the chat to index: explicit flag first, then the config default.
    pub fn resolve_chat_id(&self, flag: Option<i64>) -> Result<i64, IndexError> {
        flag.or(self.ingest.default_chat_id).ok_or_else(|| {
            IndexError::Configuration(
                "no chat id specified; pass --chat-id or set ingest.default_chat_id".to_string(),
            )
        })
    }

    /// The `[replica]` section, required by `chidx replicate`.
    pub fn replica(&self) -> Result<&ReplicaConfig, IndexError> {
        self.replica.as_ref().ok_or_else(|| {
            IndexError::Configuration("[replica] section is missing from config".to_string())
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.retention_years == 0 {
        anyhow::bail!("ingest.retention_years must be > 0");
    }
    if config.ingest.connect_attempts == 0 {
        anyhow::bail!("ingest.connect_attempts must be > 0");
    }
    if config.search.default_limit < 1 {
        anyhow::bail!("search.default_limit must be >= 1");
    }

    if let Some(replica) = &config.replica {
        if replica.batch_size == 0 {
            anyhow::bail!("replica.batch_size must be > 0");
        }
        if !(replica.url.starts_with("http://") || replica.url.starts_with("https://")) {
            anyhow::bail!("replica.url must be an http(s) URL, got '{}'", replica.url);
        }
        if replica.table.trim().is_empty() {
            anyhow::bail!("replica.table must not be empty");
        }
    }

    Ok(config)
}
