//! SQLite read-model of the event log.
//!
//! The log is the source of truth; everything in here is derived and can
//! be dropped and rebuilt at any time. Projection is idempotent on event
//! id (an `applied_events` table gates every apply), which is what makes
//! sync re-pulls and restart replays safe.

mod db;
mod error;
mod projector;
mod records;
mod schema;

pub mod queries;

pub use db::Database;
pub use error::{Error, Result};
pub use records::{
    AgentRecord, CheckpointRecord, GroupRecord, MessageQuery, MessageRecord, SessionRecord,
    TeamMember, WorkContextRecord,
};
pub use schema::SCHEMA_VERSION;
