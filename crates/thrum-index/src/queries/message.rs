use rusqlite::{OptionalExtension, Row, params_from_iter};

use crate::records::{MessageQuery, MessageRecord};
use crate::{Database, Result};

/// message.list: conjunctive filters, deterministic
/// `(created_at, message_id)` ordering.
///
/// Scope filtering happens in memory after the indexed filters have
/// narrowed the set: scopes are stored schema-on-read as a JSON column.
pub fn list(db: &Database, query: &MessageQuery) -> Result<Vec<MessageRecord>> {
    let mut sql = String::from(
        "SELECT m.message_id, m.agent_id, m.created_at, m.format, m.content,
                m.thread_id, m.reply_to, m.reply_missing, m.deleted, m.edited_at,
                m.scopes, m.refs, m.audience
         FROM messages m",
    );
    let mut conditions: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    if let Some(agent_id) = &query.agent_id {
        sql.push_str(
            " JOIN message_recipients r ON r.message_id = m.message_id AND r.agent_id = ?",
        );
        args.push(agent_id.clone());
    }
    if let Some(thread_id) = &query.thread_id {
        conditions.push("m.thread_id = ?".to_string());
        args.push(thread_id.clone());
    }
    if let Some(author) = &query.author {
        conditions.push("m.agent_id = ?".to_string());
        args.push(author.clone());
    }
    if let Some(since) = &query.since {
        conditions.push("m.created_at > ?".to_string());
        args.push(since.clone());
    }
    if !query.include_deleted {
        conditions.push("m.deleted = 0".to_string());
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY m.created_at, m.message_id");

    let mut stmt = db.conn.prepare(&sql)?;
    let mut records: Vec<MessageRecord> = stmt
        .query_map(params_from_iter(args.iter()), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if let Some(scope) = &query.scope {
        records.retain(|m| {
            m.scopes
                .iter()
                .any(|s| s.scope_type == scope.scope_type && s.value == scope.value)
        });
    }
    if let Some(limit) = query.limit {
        records.truncate(limit);
    }

    Ok(records)
}

pub fn get(db: &Database, message_id: &str) -> Result<Option<MessageRecord>> {
    let record = db
        .conn
        .query_row(
            "SELECT message_id, agent_id, created_at, format, content,
                    thread_id, reply_to, reply_missing, deleted, edited_at,
                    scopes, refs, audience
             FROM messages WHERE message_id = ?1",
            [message_id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

/// (thread_id, deleted) — what the router needs to stamp a reply.
pub fn thread_info(db: &Database, message_id: &str) -> Result<Option<(String, bool)>> {
    let info = db
        .conn
        .query_row(
            "SELECT thread_id, deleted FROM messages WHERE message_id = ?1",
            [message_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
        )
        .optional()?;
    Ok(info)
}

fn row_to_record(row: &Row) -> rusqlite::Result<MessageRecord> {
    let scopes: String = row.get(10)?;
    let refs: String = row.get(11)?;
    let audience: String = row.get(12)?;
    Ok(MessageRecord {
        message_id: row.get(0)?,
        agent_id: row.get(1)?,
        created_at: row.get(2)?,
        format: row.get(3)?,
        content: row.get(4)?,
        thread_id: row.get(5)?,
        reply_to: row.get(6)?,
        reply_missing: row.get::<_, i64>(7)? != 0,
        deleted: row.get::<_, i64>(8)? != 0,
        edited_at: row.get(9)?,
        scopes: serde_json::from_str(&scopes).unwrap_or_default(),
        refs: serde_json::from_str(&refs).unwrap_or_default(),
        audience: serde_json::from_str(&audience).unwrap_or_default(),
    })
}
