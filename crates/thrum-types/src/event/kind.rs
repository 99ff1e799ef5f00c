use std::fmt;

use serde::de::{Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Event kind tag.
///
/// The set is closed for this daemon version, but kinds written by a newer
/// peer must survive a round trip through an older daemon, so unrecognized
/// tags are carried verbatim in `Unknown` instead of failing
/// deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentRegister,
    AgentHeartbeat,
    SessionStart,
    SessionEnd,
    SessionSetIntent,
    WorkContextUpdate,
    MessageCreate,
    MessageEdit,
    MessageDelete,
    MessageRead,
    GroupCreate,
    GroupAddMember,
    GroupRemoveMember,
    SubscriptionCreate,
    SubscriptionDelete,
    Unknown(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AgentRegister => "agent.register",
            EventKind::AgentHeartbeat => "agent.heartbeat",
            EventKind::SessionStart => "session.start",
            EventKind::SessionEnd => "session.end",
            EventKind::SessionSetIntent => "session.set_intent",
            EventKind::WorkContextUpdate => "work_context.update",
            EventKind::MessageCreate => "message.create",
            EventKind::MessageEdit => "message.edit",
            EventKind::MessageDelete => "message.delete",
            EventKind::MessageRead => "message.read",
            EventKind::GroupCreate => "group.create",
            EventKind::GroupAddMember => "group.add_member",
            EventKind::GroupRemoveMember => "group.remove_member",
            EventKind::SubscriptionCreate => "subscription.create",
            EventKind::SubscriptionDelete => "subscription.delete",
            EventKind::Unknown(tag) => tag,
        }
    }

    /// Message-authored kinds live in the per-author shard.
    pub fn is_message_shard(&self) -> bool {
        matches!(
            self,
            EventKind::MessageCreate | EventKind::MessageEdit | EventKind::MessageDelete
        )
    }

    /// Kinds that must never reach the synced branch.
    ///
    /// Read receipts and subscriptions are private per machine; keeping
    /// them out of the sync shards is how that privacy is enforced.
    pub fn is_local_only(&self) -> bool {
        matches!(
            self,
            EventKind::MessageRead
                | EventKind::SubscriptionCreate
                | EventKind::SubscriptionDelete
        )
    }
}

impl From<&str> for EventKind {
    fn from(tag: &str) -> Self {
        match tag {
            "agent.register" => EventKind::AgentRegister,
            "agent.heartbeat" => EventKind::AgentHeartbeat,
            "session.start" => EventKind::SessionStart,
            "session.end" => EventKind::SessionEnd,
            "session.set_intent" => EventKind::SessionSetIntent,
            "work_context.update" => EventKind::WorkContextUpdate,
            "message.create" => EventKind::MessageCreate,
            "message.edit" => EventKind::MessageEdit,
            "message.delete" => EventKind::MessageDelete,
            "message.read" => EventKind::MessageRead,
            "group.create" => EventKind::GroupCreate,
            "group.add_member" => EventKind::GroupAddMember,
            "group.remove_member" => EventKind::GroupRemoveMember,
            "subscription.create" => EventKind::SubscriptionCreate,
            "subscription.delete" => EventKind::SubscriptionDelete,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.is_empty() {
            return Err(D::Error::custom("event kind must be non-empty"));
        }
        Ok(EventKind::from(tag.as_str()))
    }
}
