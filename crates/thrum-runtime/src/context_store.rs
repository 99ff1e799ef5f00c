use thrum_types::Result;

use crate::paths::{ThrumPaths, write_atomic};

/// Narrative context notes (`.thrum/context/<agent_id>.md`): free-form
/// markdown an agent stashes so it can recover after a restart or a
/// context-window compaction. Local-only, never synced, never projected.
pub fn save_context(paths: &ThrumPaths, agent_id: &str, content: &str) -> Result<()> {
    write_atomic(&paths.context_path(agent_id), content.as_bytes())
}

pub fn load_context(paths: &ThrumPaths, agent_id: &str) -> Result<Option<String>> {
    let path = paths.context_path(agent_id);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(&path)?))
}
