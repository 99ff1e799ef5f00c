use std::path::PathBuf;

use thrum_types::Event;

/// Target file class for an event.
///
/// `Lifecycle` and `Messages` shards live inside the sync worktree and
/// travel between peers; `Local` lives under `.thrum/var/` and never does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shard {
    Lifecycle,
    Messages(String),
    Local,
}

impl Shard {
    pub fn for_event(event: &Event) -> Shard {
        if event.kind.is_local_only() {
            Shard::Local
        } else if event.kind.is_message_shard() {
            Shard::Messages(event.actor_id.clone())
        } else {
            Shard::Lifecycle
        }
    }

    /// Path relative to the shard root (synced root for lifecycle/messages,
    /// local var dir for local).
    pub fn rel_path(&self) -> PathBuf {
        match self {
            Shard::Lifecycle => PathBuf::from("events.jsonl"),
            Shard::Messages(agent_id) => {
                PathBuf::from("messages").join(format!("{}.jsonl", sanitize(agent_id)))
            }
            Shard::Local => PathBuf::from("local.jsonl"),
        }
    }

    pub fn is_synced(&self) -> bool {
        !matches!(self, Shard::Local)
    }
}

/// Agent ids become file names; anything outside a conservative set is
/// replaced so an id can never escape the messages directory.
fn sanitize(agent_id: &str) -> String {
    agent_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
