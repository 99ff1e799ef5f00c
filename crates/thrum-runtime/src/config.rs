use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thrum_sync::{Peer, SyncConfig};
use thrum_types::Result;

use crate::paths::write_atomic;

fn default_sync_interval() -> u64 {
    15
}

fn default_sync_branch() -> String {
    "a-sync".to_string()
}

/// Daemon configuration (`.thrum/config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sync peers (git remotes reachable from this machine)
    #[serde(default)]
    pub peers: Vec<Peer>,

    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_sync_branch")]
    pub sync_branch: String,

    /// WebSocket listen port; absent means unix socket only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            sync_interval_secs: default_sync_interval(),
            sync_branch: default_sync_branch(),
            listen_port: None,
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|err| thrum_types::Error::Validation(format!("invalid config.json: {}", err)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|err| thrum_types::Error::Internal(err.to_string()))?;
        write_atomic(path, contents.as_bytes())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            branch: self.sync_branch.clone(),
            interval: Duration::from_secs(self.sync_interval_secs),
            peers: self.peers.clone(),
        }
    }
}
