use serde::{Deserialize, Serialize};
use shardstore_core::{Result, RetryPolicy, StoreError};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub block_stores: Vec<BlockStoreConfig>,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStoreConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub data_dir: PathBuf,
}

/// Address clients dial: the explicit endpoint, else `http://{bind_addr}`.
fn effective_endpoint(endpoint: &Option<String>, bind_addr: &str) -> String {
    endpoint
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("http://{}", bind_addr))
}

impl MetadataConfig {
    pub fn effective_endpoint(&self) -> String {
        effective_endpoint(&self.endpoint, &self.bind_addr)
    }
}

impl BlockStoreConfig {
    pub fn effective_endpoint(&self) -> String {
        effective_endpoint(&self.endpoint, &self.bind_addr)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_probe_samples")]
    pub probe_samples: u32,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    16
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_probe_samples() -> u32 {
    3
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            probe_samples: default_probe_samples(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("SHARDSTORE").separator("__"))
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_stores.is_empty() {
            return Err(StoreError::Config(
                "at least one block store must be configured".to_string(),
            ));
        }

        if self.metadata.bind_addr.trim().is_empty() {
            return Err(StoreError::Config(
                "metadata.bind_addr cannot be empty".to_string(),
            ));
        }

        for (index, store) in self.block_stores.iter().enumerate() {
            if store.bind_addr.trim().is_empty() {
                return Err(StoreError::Config(format!(
                    "block_stores[{}].bind_addr cannot be empty",
                    index
                )));
            }
        }

        if self.client.max_attempts == 0 {
            return Err(StoreError::Config(
                "client.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn block_store(&self, index: usize) -> Result<&BlockStoreConfig> {
        self.block_stores.get(index).ok_or_else(|| {
            StoreError::Config(format!(
                "block store index {} out of range ({} configured)",
                index,
                self.block_stores.len()
            ))
        })
    }

    pub fn shard_endpoints(&self) -> Vec<String> {
        self.block_stores
            .iter()
            .map(BlockStoreConfig::effective_endpoint)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
metadata:
  bind_addr: 127.0.0.1:6000
block_stores:
  - bind_addr: 127.0.0.1:7000
    data_dir: /tmp/shardstore/block0
  - bind_addr: 0.0.0.0:7001
    endpoint: http://10.0.0.2:7001
    data_dir: /tmp/shardstore/block1
client:
  max_attempts: 4
"#;

    fn write_sample(contents: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shardstore.yaml");
        std::fs::write(&path, contents).unwrap();
        let path = path.to_string_lossy().to_string();
        (dir, path)
    }

    #[test]
    fn test_load_config_file() {
        let (_dir, path) = write_sample(SAMPLE);
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.metadata.effective_endpoint(), "http://127.0.0.1:6000");
        assert_eq!(
            config.shard_endpoints(),
            vec![
                "http://127.0.0.1:7000".to_string(),
                "http://10.0.0.2:7001".to_string()
            ]
        );
        assert_eq!(config.client.max_attempts, 4);
        assert_eq!(config.client.request_timeout_ms, 10_000);
        assert_eq!(config.client.retry_policy().max_attempts, 4);
        assert!(config.block_store(1).is_ok());
        assert!(config.block_store(2).is_err());
    }

    #[test]
    fn test_rejects_config_without_block_stores() {
        let (_dir, path) = write_sample(
            r#"
metadata:
  bind_addr: 127.0.0.1:6000
block_stores: []
"#,
        );
        let error = Config::from_file(&path).unwrap_err();
        assert!(matches!(error, StoreError::Config(_)));
    }
}
