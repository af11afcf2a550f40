//! Configuration loading and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaveError};

/// Top-level weave configuration. All sections are optional; accessors
/// supply the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Sliding TTL for cached artifacts, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    /// How often the background sweeper runs, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the remote persistence API. When absent, sync runs
    /// local-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_base_url: Option<String>,

    /// Directory for the local JSONL thread/message store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

impl Config {
    /// Load config from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)
            .map_err(|e| WeaveError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Default config location: `~/.weave/weave.json`.
    pub fn config_path() -> PathBuf {
        data_dir().join("weave.json")
    }

    pub fn artifact_ttl(&self) -> Duration {
        let secs = self
            .cache
            .as_ref()
            .and_then(|c| c.ttl_secs)
            .unwrap_or(3600);
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .cache
            .as_ref()
            .and_then(|c| c.sweep_interval_secs)
            .unwrap_or(300);
        Duration::from_secs(secs)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().and_then(|g| g.port).unwrap_or(18790)
    }

    pub fn remote_base_url(&self) -> Option<String> {
        self.sync.as_ref().and_then(|s| s.remote_base_url.clone())
    }

    pub fn sync_data_dir(&self) -> PathBuf {
        self.sync
            .as_ref()
            .and_then(|s| s.data_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("threads"))
    }
}

/// Base data directory: `~/.weave/`.
pub fn data_dir() -> PathBuf {
    dirs_home().join(".weave")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
