use thrum_types::{GroupMember, Result};
use ulid::Ulid;

/// What the router needs to know about a reply target.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub thread_id: Ulid,
    pub deleted: bool,
}

/// Read-only view of the projection consumed by the engine.
///
/// Group member lookups are by *name* and union members across every
/// group id sharing that name (two peers may create the same name
/// independently; see the sync design).
pub trait Directory {
    fn is_group(&self, name: &str) -> Result<bool>;
    fn group_members(&self, name: &str) -> Result<Vec<GroupMember>>;
    fn agents_with_role(&self, role: &str) -> Result<Vec<String>>;
    fn all_agent_ids(&self) -> Result<Vec<String>>;
    fn thread_info(&self, message_id: &Ulid) -> Result<Option<ThreadInfo>>;
}
