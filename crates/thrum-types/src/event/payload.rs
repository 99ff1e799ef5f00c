use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::domain::{AgentKind, GroupMember, SubscriptionFilter, WorkContext};
use crate::message::{MessageBody, Ref, Scope};

use super::kind::EventKind;

/// Typed view of an event payload.
///
/// Decoding is deferred until a consumer recognizes the kind; an
/// unrecognized kind decodes to `Unknown` so the record can still be
/// tracked by id (and synced through) without understanding it.
#[derive(Debug, Clone)]
pub enum EventPayload {
    AgentRegister(AgentRegisterPayload),
    AgentHeartbeat(AgentHeartbeatPayload),
    SessionStart(SessionStartPayload),
    SessionEnd(SessionEndPayload),
    SessionSetIntent(SessionSetIntentPayload),
    WorkContextUpdate(WorkContextUpdatePayload),
    MessageCreate(MessageCreatePayload),
    MessageEdit(MessageEditPayload),
    MessageDelete(MessageDeletePayload),
    MessageRead(MessageReadPayload),
    GroupCreate(GroupCreatePayload),
    GroupAddMember(GroupMemberPayload),
    GroupRemoveMember(GroupMemberPayload),
    SubscriptionCreate(SubscriptionCreatePayload),
    SubscriptionDelete(SubscriptionDeletePayload),
    Unknown,
}

impl EventPayload {
    /// Parse `value` against the schema for `kind`.
    pub fn decode(kind: &EventKind, value: &Value) -> Result<Self, serde_json::Error> {
        let payload = match kind {
            EventKind::AgentRegister => {
                EventPayload::AgentRegister(serde_json::from_value(value.clone())?)
            }
            EventKind::AgentHeartbeat => {
                EventPayload::AgentHeartbeat(serde_json::from_value(value.clone())?)
            }
            EventKind::SessionStart => {
                EventPayload::SessionStart(serde_json::from_value(value.clone())?)
            }
            EventKind::SessionEnd => {
                EventPayload::SessionEnd(serde_json::from_value(value.clone())?)
            }
            EventKind::SessionSetIntent => {
                EventPayload::SessionSetIntent(serde_json::from_value(value.clone())?)
            }
            EventKind::WorkContextUpdate => {
                EventPayload::WorkContextUpdate(serde_json::from_value(value.clone())?)
            }
            EventKind::MessageCreate => {
                EventPayload::MessageCreate(serde_json::from_value(value.clone())?)
            }
            EventKind::MessageEdit => {
                EventPayload::MessageEdit(serde_json::from_value(value.clone())?)
            }
            EventKind::MessageDelete => {
                EventPayload::MessageDelete(serde_json::from_value(value.clone())?)
            }
            EventKind::MessageRead => {
                EventPayload::MessageRead(serde_json::from_value(value.clone())?)
            }
            EventKind::GroupCreate => {
                EventPayload::GroupCreate(serde_json::from_value(value.clone())?)
            }
            EventKind::GroupAddMember => {
                EventPayload::GroupAddMember(serde_json::from_value(value.clone())?)
            }
            EventKind::GroupRemoveMember => {
                EventPayload::GroupRemoveMember(serde_json::from_value(value.clone())?)
            }
            EventKind::SubscriptionCreate => {
                EventPayload::SubscriptionCreate(serde_json::from_value(value.clone())?)
            }
            EventKind::SubscriptionDelete => {
                EventPayload::SubscriptionDelete(serde_json::from_value(value.clone())?)
            }
            EventKind::Unknown(_) => EventPayload::Unknown,
        };
        Ok(payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterPayload {
    pub agent_id: String,
    pub kind: AgentKind,
    pub role: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHeartbeatPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartPayload {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Detached sessions survive the RPC connection that opened them
    #[serde(default)]
    pub detached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSetIntentPayload {
    pub session_id: String,
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkContextUpdatePayload {
    pub session_id: String,
    pub context: WorkContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreatePayload {
    /// The message id is the event id; only derived fields live here.
    pub body: MessageBody,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub refs: Vec<Ref>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Ulid>,
    /// Best-known thread root at create time; the projector revises this
    /// when an out-of-order parent arrives
    pub thread_id: Ulid,
    /// Audience stamped by the router: group refs expanded, deduplicated
    #[serde(default)]
    pub audience: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEditPayload {
    pub message_id: Ulid,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeletePayload {
    pub message_id: Ulid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadPayload {
    pub message_id: Ulid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCreatePayload {
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Shared by group.add_member and group.remove_member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberPayload {
    pub group_id: String,
    pub name: String,
    pub member: GroupMember,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionCreatePayload {
    pub subscription_id: String,
    pub session_id: String,
    pub filter: SubscriptionFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionDeletePayload {
    pub subscription_id: String,
}
