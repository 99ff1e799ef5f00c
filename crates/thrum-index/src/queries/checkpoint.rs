use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::db::fmt_ts;
use crate::records::CheckpointRecord;
use crate::{Database, Result};

/// Record the newest event id acknowledged from `peer_id`. Local-only
/// state: checkpoints never ride the sync branch.
pub fn upsert(db: &Database, peer_id: &str, last_ack_event_id: Option<&str>) -> Result<()> {
    db.conn.execute(
        "INSERT INTO sync_checkpoints (peer_id, last_ack_event_id, last_ack_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(peer_id) DO UPDATE SET
             last_ack_event_id = COALESCE(?2, last_ack_event_id),
             last_ack_at = ?3",
        params![peer_id, last_ack_event_id, fmt_ts(Utc::now())],
    )?;
    Ok(())
}

pub fn get(db: &Database, peer_id: &str) -> Result<Option<CheckpointRecord>> {
    let checkpoint = db
        .conn
        .query_row(
            "SELECT peer_id, last_ack_event_id, last_ack_at
             FROM sync_checkpoints WHERE peer_id = ?1",
            [peer_id],
            |row| {
                Ok(CheckpointRecord {
                    peer_id: row.get(0)?,
                    last_ack_event_id: row.get(1)?,
                    last_ack_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(checkpoint)
}

pub fn list(db: &Database) -> Result<Vec<CheckpointRecord>> {
    let mut stmt = db.conn.prepare(
        "SELECT peer_id, last_ack_event_id, last_ack_at
         FROM sync_checkpoints ORDER BY peer_id",
    )?;
    let checkpoints = stmt
        .query_map([], |row| {
            Ok(CheckpointRecord {
                peer_id: row.get(0)?,
                last_ack_event_id: row.get(1)?,
                last_ack_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(checkpoints)
}
