//! Multi-peer eventually-consistent propagation of the event log over a
//! dedicated git branch.
//!
//! A hidden worktree under `<git-common-dir>/thrum-sync/` holds only the
//! JSONL shards. Each cycle commits local appends, fetches every peer's
//! branch tip into a namespaced ref, merges (fast-forward when possible,
//! deterministic line-union otherwise), projects newly visible events,
//! and pushes the result back. Peers whose history cannot be merged as a
//! pure union are quarantined; local writes never depend on sync health.

mod engine;
mod error;
mod git;
mod merge;

pub use engine::{EventSink, Peer, PeerState, PeerStatus, SyncConfig, SyncEngine, SyncHealth, SyncState};
pub use error::{Error, Result};
pub use git::ensure_sync_worktree;
pub use merge::union_merge;
