use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One run of an agent. At most one non-ended session per agent; a
/// session.start for an agent with an open session closes the prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Porcelain status code ("M", "A", "??", ...)
    pub status: String,
}

/// Per-session working snapshot, overwritten on each heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkContext {
    pub branch: String,
    pub worktree: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub unmerged_commits: u32,
    #[serde(default)]
    pub changes: Vec<FileChange>,
    pub git_updated_at: DateTime<Utc>,
}
