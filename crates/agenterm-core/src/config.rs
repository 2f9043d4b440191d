//! Engine-level configuration (timeouts, retry knobs, bind address), loaded
//! once at startup from `state_dir/config.json`. Distinct from the
//! out-of-scope YAML playbook/agent-registry loader, which the orchestrator
//! consumes through its own `PlaybookRegistry` trait.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub command_ack_ms: u64,
    pub command_complete_ms: u64,
    pub output_flush_ms: u64,
    pub readiness_quiescence_ms: u64,
    pub readiness_timeout_ms: u64,
    pub idle_threshold_ms: u64,
    pub working_threshold_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            command_ack_ms: 2_000,
            command_complete_ms: 10_000,
            output_flush_ms: 1_500,
            readiness_quiescence_ms: 800,
            readiness_timeout_ms: 5_000,
            idle_threshold_ms: 30_000,
            working_threshold_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub timeouts: TimeoutsConfig,
    pub scrollback_lines: usize,
    pub max_tool_rounds: u32,
    pub max_review_cycles: u32,
    /// Base URL of the agent sidecar process. `None` runs with
    /// `NullAgentClient` (no provider configured).
    #[serde(default)]
    pub sidecar_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 4700,
            timeouts: TimeoutsConfig::default(),
            scrollback_lines: 2_000,
            max_tool_rounds: 10,
            max_review_cycles: 20,
            sidecar_url: None,
        }
    }
}

/// Loaded once at startup via `ConfigStore::new(path).await` and held
/// behind a lock for the process lifetime.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<EngineConfig>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let current = if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&raw)?
        } else {
            EngineConfig::default()
        };
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub async fn get(&self) -> EngineConfig {
        self.current.read().await.clone()
    }

    pub async fn set(&self, config: EngineConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(&config)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *self.current.write().await = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json")).await.unwrap();
        assert_eq!(store.get().await.bind_port, 4700);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(&path).await.unwrap();
        let mut config = store.get().await;
        config.bind_port = 9000;
        store.set(config).await.unwrap();

        let reloaded = ConfigStore::new(&path).await.unwrap();
        assert_eq!(reloaded.get().await.bind_port, 9000);
    }
}
