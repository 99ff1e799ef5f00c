use serde::{Deserialize, Serialize};
use thrum_types::{FileChange, Ref, Scope};

/// One projected message row. Timestamps are the canonical fixed-width
/// RFC 3339 strings used throughout the projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub agent_id: String,
    pub created_at: String,
    pub format: String,
    pub content: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Set while reply_to points at a message the projection has not seen
    pub reply_missing: bool,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    pub scopes: Vec<Scope>,
    pub refs: Vec<Ref>,
    pub audience: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub kind: String,
    pub role: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub registered_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub agent_id: String,
    pub started_at: String,
    pub last_seen_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub detached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkContextRecord {
    pub session_id: String,
    pub agent_id: String,
    pub branch: String,
    pub worktree: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub unmerged_commits: u32,
    pub changes: Vec<FileChange>,
    pub git_updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ack_event_id: Option<String>,
    pub last_ack_at: String,
}

/// Rich per-agent snapshot returned by team.list: directory row, open
/// session (if any), latest work context, unread inbox count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub agent: AgentRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_context: Option<WorkContextRecord>,
    pub unread_count: u32,
}

/// Filter set for message.list. All fields are conjunctive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageQuery {
    /// Recipient filter: messages whose audience contains this agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// `{type, value}` scope match; exact on both positions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    /// Only messages created strictly after this timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_deleted: bool,
}
