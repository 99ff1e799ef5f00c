use std::collections::HashMap;

use rusqlite::{OptionalExtension, Row};

use crate::records::{AgentRecord, SessionRecord, TeamMember, WorkContextRecord};
use crate::{Database, Result};

/// team.list snapshot.
///
/// Two queries — one JOIN for directory/session/context state, one
/// GROUP BY for unread inbox counts — merged in memory. Deliberately
/// simpler than a single giant join.
pub fn team_list(db: &Database) -> Result<Vec<TeamMember>> {
    let mut stmt = db.conn.prepare(
        "SELECT a.agent_id, a.kind, a.role, a.module, a.display, a.hostname, a.registered_at,
                s.session_id, s.started_at, s.last_seen_at, s.ended_at, s.intent, s.detached,
                w.session_id, w.agent_id, w.branch, w.worktree, w.intent, w.task_id,
                w.unmerged_commits, w.changes, w.git_updated_at
         FROM agents a
         LEFT JOIN sessions s ON s.agent_id = a.agent_id AND s.ended_at IS NULL
         LEFT JOIN work_contexts w ON w.session_id = s.session_id
         ORDER BY a.agent_id",
    )?;

    let mut members: Vec<TeamMember> = stmt
        .query_map([], |row| {
            let agent = row_to_agent(row, 0)?;
            let session = row_to_opt_session(row, 7)?;
            let work_context = row_to_opt_context(row, 13)?;
            Ok(TeamMember {
                agent,
                session,
                work_context,
                unread_count: 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut unread: HashMap<String, u32> = HashMap::new();
    let mut stmt = db.conn.prepare(
        "SELECT r.agent_id, COUNT(*)
         FROM message_recipients r
         JOIN messages m ON m.message_id = r.message_id AND m.deleted = 0
         WHERE NOT EXISTS (
             SELECT 1 FROM message_reads rd
             WHERE rd.message_id = r.message_id AND rd.agent_id = r.agent_id
         )
         GROUP BY r.agent_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
    })?;
    for row in rows {
        let (agent_id, count) = row?;
        unread.insert(agent_id, count);
    }

    for member in &mut members {
        member.unread_count = unread.get(&member.agent.agent_id).copied().unwrap_or(0);
    }

    Ok(members)
}

pub fn agent_list(db: &Database) -> Result<Vec<AgentRecord>> {
    let mut stmt = db.conn.prepare(
        "SELECT agent_id, kind, role, module, display, hostname, registered_at
         FROM agents ORDER BY agent_id",
    )?;
    let agents = stmt
        .query_map([], |row| row_to_agent(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(agents)
}

pub fn agent_get(db: &Database, agent_id: &str) -> Result<Option<AgentRecord>> {
    let agent = db
        .conn
        .query_row(
            "SELECT agent_id, kind, role, module, display, hostname, registered_at
             FROM agents WHERE agent_id = ?1",
            [agent_id],
            |row| row_to_agent(row, 0),
        )
        .optional()?;
    Ok(agent)
}

pub fn open_session(db: &Database, agent_id: &str) -> Result<Option<SessionRecord>> {
    let session = db
        .conn
        .query_row(
            "SELECT session_id, agent_id, started_at, last_seen_at, ended_at, intent, detached
             FROM sessions WHERE agent_id = ?1 AND ended_at IS NULL",
            [agent_id],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

pub fn session_get(db: &Database, session_id: &str) -> Result<Option<SessionRecord>> {
    let session = db
        .conn
        .query_row(
            "SELECT session_id, agent_id, started_at, last_seen_at, ended_at, intent, detached
             FROM sessions WHERE session_id = ?1",
            [session_id],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

fn row_to_agent(row: &Row, base: usize) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        agent_id: row.get(base)?,
        kind: row.get(base + 1)?,
        role: row.get(base + 2)?,
        module: row.get(base + 3)?,
        display: row.get(base + 4)?,
        hostname: row.get(base + 5)?,
        registered_at: row.get(base + 6)?,
    })
}

fn row_to_session(row: &Row) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        session_id: row.get(0)?,
        agent_id: row.get(1)?,
        started_at: row.get(2)?,
        last_seen_at: row.get(3)?,
        ended_at: row.get(4)?,
        intent: row.get(5)?,
        detached: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_opt_session(row: &Row, base: usize) -> rusqlite::Result<Option<SessionRecord>> {
    let session_id: Option<String> = row.get(base)?;
    let Some(session_id) = session_id else {
        return Ok(None);
    };
    Ok(Some(SessionRecord {
        session_id,
        // column 0 is a.agent_id; open sessions always belong to that agent
        agent_id: row.get(0)?,
        started_at: row.get(base + 1)?,
        last_seen_at: row.get(base + 2)?,
        ended_at: row.get(base + 3)?,
        intent: row.get(base + 4)?,
        detached: row.get::<_, i64>(base + 5)? != 0,
    }))
}

fn row_to_opt_context(row: &Row, base: usize) -> rusqlite::Result<Option<WorkContextRecord>> {
    let session_id: Option<String> = row.get(base)?;
    let Some(session_id) = session_id else {
        return Ok(None);
    };
    let changes: String = row.get(base + 7)?;
    Ok(Some(WorkContextRecord {
        session_id,
        agent_id: row.get(base + 1)?,
        branch: row.get(base + 2)?,
        worktree: row.get(base + 3)?,
        intent: row.get(base + 4)?,
        task_id: row.get(base + 5)?,
        unmerged_commits: row.get::<_, i64>(base + 6)? as u32,
        changes: serde_json::from_str(&changes).unwrap_or_default(),
        git_updated_at: row.get(base + 8)?,
    }))
}
