//! Core types shared by every thrum crate.
//!
//! The only persisted primitive is the [`Event`]: an immutable, append-only
//! record identified by a ULID. Everything else in the system (agents,
//! sessions, messages, groups) is a projection derived from replaying
//! events, so the types here are deliberately plain serde structs with no
//! behavior beyond construction and classification helpers.

pub mod domain;
pub mod error;
pub mod event;
pub mod message;

pub use domain::{
    Agent, AgentKind, FileChange, Group, GroupMember, MemberType, Session, Subscription,
    SubscriptionFilter, SyncCheckpoint, WorkContext,
};
pub use error::{Error, Result};
pub use event::{Event, EventIdGen, EventKind, EventPayload};
pub use message::{FilterType, MessageBody, Ref, RefType, Scope};
