use thrum_types::{Agent, Result};

use crate::paths::{ThrumPaths, write_atomic};

/// Hostname for agent registration: `THRUM_HOSTNAME` wins, otherwise the
/// OS hostname with a trailing `.local` trimmed.
pub fn default_hostname() -> String {
    if let Ok(value) = std::env::var("THRUM_HOSTNAME")
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }
    let name = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    name.trim_end_matches(".local").to_string()
}

/// Persist the identity file that makes an agent id portable across
/// sessions in the same worktree.
pub fn save_identity(paths: &ThrumPaths, agent: &Agent) -> Result<()> {
    let contents = serde_json::to_string_pretty(agent)
        .map_err(|err| thrum_types::Error::Internal(err.to_string()))?;
    write_atomic(&paths.identity_path(&agent.agent_id), contents.as_bytes())
}

pub fn load_identity(paths: &ThrumPaths, agent_id: &str) -> Result<Option<Agent>> {
    let path = paths.identity_path(agent_id);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)?;
    let agent = serde_json::from_str(&contents).map_err(|err| {
        thrum_types::Error::Internal(format!("corrupt identity file {}: {}", path.display(), err))
    })?;
    Ok(Some(agent))
}
