pub mod checkpoint;
pub mod group;
pub mod message;
pub mod team;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::{Database, Result};

/// Row counts surfaced by health.get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionStats {
    pub applied_events: u64,
    pub messages: u64,
    pub agents: u64,
    pub open_sessions: u64,
}

pub fn stats(db: &Database) -> Result<ProjectionStats> {
    let count = |sql: &str| -> Result<u64> {
        let n: i64 = db.conn.query_row(sql, params![], |row| row.get(0))?;
        Ok(n as u64)
    };
    Ok(ProjectionStats {
        applied_events: count("SELECT COUNT(*) FROM applied_events")?,
        messages: count("SELECT COUNT(*) FROM messages")?,
        agents: count("SELECT COUNT(*) FROM agents")?,
        open_sessions: count("SELECT COUNT(*) FROM sessions WHERE ended_at IS NULL")?,
    })
}
