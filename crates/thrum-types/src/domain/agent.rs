use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Agent,
    User,
}

/// An addressable actor. Identity is process-wide per worktree but portable
/// across sessions via the local identity file; `agent_id` is the stable key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub kind: AgentKind,
    /// Group-expansion input (`coordinator`, `implementer`, `reviewer`, ...)
    pub role: String,
    /// Usually a branch name
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub registered_at: DateTime<Utc>,
}
