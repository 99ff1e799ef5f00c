mod event;
mod id;
mod kind;
mod payload;

pub use event::Event;
pub use id::EventIdGen;
pub use kind::EventKind;
pub use payload::{
    AgentHeartbeatPayload, AgentRegisterPayload, EventPayload, GroupCreatePayload,
    GroupMemberPayload, MessageCreatePayload, MessageEditPayload, MessageDeletePayload,
    MessageReadPayload, SessionEndPayload, SessionSetIntentPayload, SessionStartPayload,
    SubscriptionCreatePayload, SubscriptionDeletePayload, WorkContextUpdatePayload,
};
