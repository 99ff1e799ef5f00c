use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use super::kind::EventKind;

// NOTE: Event Record Design
//
// Why an opaque payload (not a tagged enum on disk)?
// - The log outlives any single daemon version; a newer peer's events must
//   pass through an older daemon's projector and sync engine untouched
// - Payloads are parsed against a kind-specific schema only when the kind
//   is recognized; unknown kinds are still recorded by id so re-pulls
//   after a rollback stay idempotent
//
// Why ULID event ids?
// - Lexicographic order ~ creation order, which gives the cross-file
//   ordering rule "timestamp, then id" a stable tiebreak
// - Monotonic generation per actor makes per-author shard order the
//   causal order with no extra sequence column
//
// Identity: two events are the same event iff their ids match. The id is
// the dedup key under sync; nothing else about a record is compared.

/// One immutable record of the append-only log.
/// Serializes to exactly one line of canonical JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique id (26-char ULID), monotonic within one actor
    pub id: Ulid,

    /// Kind tag; drives shard placement and projection
    pub kind: EventKind,

    /// Agent that produced the event
    pub actor_id: String,

    /// Creation timestamp (RFC 3339, nanosecond precision)
    pub ts: DateTime<Utc>,

    /// Kind-typed payload, kept opaque until projection
    pub payload: Value,
}

impl Event {
    pub fn new(id: Ulid, kind: EventKind, actor_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id,
            kind,
            actor_id: actor_id.into(),
            ts: Utc::now(),
            payload,
        }
    }

    /// Cross-file ordering key: wall-clock first, ULID lexicographic as
    /// the tiebreak. Per-file order is authoritative for one author.
    pub fn order_key(&self) -> (DateTime<Utc>, Ulid) {
        (self.ts, self.id)
    }
}
