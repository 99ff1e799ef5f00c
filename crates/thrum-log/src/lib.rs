//! Durable append-only event log.
//!
//! Events are stored as one line of canonical JSON per record, sharded by
//! kind: lifecycle events in `events.jsonl`, message events in
//! `messages/<agent_id>.jsonl` per author, and local-only kinds (read
//! receipts, subscriptions) in a separate file that never enters the sync
//! worktree. Per-file order is the authoritative order for causally
//! related events; cross-file order sorts by `(timestamp, event_id)`.
//!
//! All writes funnel through one named worker thread, so appends are
//! serialized without any lock on the read path.

mod error;
mod log;
mod shard;

pub use error::{Error, Result};
pub use log::{EventLog, ReadReport};
pub use shard::Shard;
