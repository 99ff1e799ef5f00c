use rusqlite::{OptionalExtension, Transaction, params};
use thrum_types::{Event, EventPayload};
use tracing::warn;

use crate::Result;
use crate::db::{Database, fmt_ts};

/// Commit granularity during bulk replay (initial rebuild, sync pull).
/// Interactive appends commit per event.
const BATCH_COMMIT_EVERY: usize = 500;

/// Reply chains are materialized at create time so reads never walk; this
/// caps the repair walk when an out-of-order parent shows up.
const THREAD_WALK_CAP: usize = 1000;

impl Database {
    /// Project one event. Returns false when the event id was already
    /// applied (idempotence gate).
    ///
    /// Payloads that fail to decode for a known kind are logged and
    /// skipped, never surfaced: they come from foreign peers during
    /// replay and must not halt projection.
    pub fn apply_event(&mut self, event: &Event) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let fresh = mark_applied(&tx, event)?;
        if fresh {
            dispatch(&tx, event)?;
        }
        tx.commit()?;
        Ok(fresh)
    }

    /// Batch projection for replay; commits every N events for
    /// throughput. Returns the events that were newly applied, in input
    /// order, so callers can fan them out to subscribers.
    pub fn apply_batch(&mut self, events: &[Event]) -> Result<Vec<Event>> {
        let mut applied = Vec::new();
        for chunk in events.chunks(BATCH_COMMIT_EVERY) {
            let tx = self.conn.transaction()?;
            for event in chunk {
                if mark_applied(&tx, event)? {
                    dispatch(&tx, event)?;
                    applied.push(event.clone());
                }
            }
            tx.commit()?;
        }
        Ok(applied)
    }
}

fn mark_applied(tx: &Transaction, event: &Event) -> Result<bool> {
    // The event's own timestamp (not wall clock) keeps a rebuilt
    // projection byte-identical to the incrementally built one.
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO applied_events (event_id, kind, applied_at) VALUES (?1, ?2, ?3)",
        params![event.id.to_string(), event.kind.as_str(), fmt_ts(event.ts)],
    )?;
    Ok(inserted == 1)
}

fn dispatch(tx: &Transaction, event: &Event) -> Result<()> {
    let payload = match EventPayload::decode(&event.kind, &event.payload) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(
                event_id = %event.id,
                kind = %event.kind,
                %err,
                "undecodable payload; event recorded but not projected"
            );
            return Ok(());
        }
    };

    match payload {
        EventPayload::AgentRegister(p) => {
            // Earliest-seen registration is canonical; a colliding id from
            // another peer never rewrites agent metadata.
            tx.execute(
                "INSERT OR IGNORE INTO agents
                 (agent_id, kind, role, module, display, hostname, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    p.agent_id,
                    match p.kind {
                        thrum_types::AgentKind::Agent => "agent",
                        thrum_types::AgentKind::User => "user",
                    },
                    p.role,
                    p.module,
                    p.display,
                    p.hostname,
                    fmt_ts(event.ts),
                ],
            )?;
        }
        EventPayload::AgentHeartbeat(p) => {
            tx.execute(
                "UPDATE sessions SET last_seen_at = ?1
                 WHERE session_id = ?2 AND ended_at IS NULL",
                params![fmt_ts(event.ts), p.session_id],
            )?;
        }
        EventPayload::SessionStart(p) => {
            // At most one open session per agent: starting a new one
            // closes whatever was open.
            tx.execute(
                "UPDATE sessions SET ended_at = ?1
                 WHERE agent_id = ?2 AND ended_at IS NULL AND session_id != ?3",
                params![fmt_ts(event.ts), event.actor_id, p.session_id],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO sessions
                 (session_id, agent_id, started_at, last_seen_at, ended_at, intent, detached)
                 VALUES (?1, ?2, ?3, ?3, NULL, ?4, ?5)",
                params![
                    p.session_id,
                    event.actor_id,
                    fmt_ts(event.ts),
                    p.intent,
                    p.detached as i64,
                ],
            )?;
        }
        EventPayload::SessionEnd(p) => {
            tx.execute(
                "UPDATE sessions SET ended_at = ?1
                 WHERE session_id = ?2 AND ended_at IS NULL",
                params![fmt_ts(event.ts), p.session_id],
            )?;
        }
        EventPayload::SessionSetIntent(p) => {
            tx.execute(
                "UPDATE sessions SET intent = ?1 WHERE session_id = ?2",
                params![p.intent, p.session_id],
            )?;
        }
        EventPayload::WorkContextUpdate(p) => {
            tx.execute(
                "INSERT OR REPLACE INTO work_contexts
                 (session_id, agent_id, branch, worktree, intent, task_id,
                  unmerged_commits, changes, git_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    p.session_id,
                    event.actor_id,
                    p.context.branch,
                    p.context.worktree,
                    p.context.intent,
                    p.context.task_id,
                    p.context.unmerged_commits,
                    serde_json::to_string(&p.context.changes)
                        .unwrap_or_else(|_| "[]".to_string()),
                    fmt_ts(p.context.git_updated_at),
                ],
            )?;
        }
        EventPayload::MessageCreate(p) => {
            apply_message_create(tx, event, &p)?;
        }
        EventPayload::MessageEdit(p) => {
            // Edits of deleted or unseen messages are rejected on the RPC
            // path before an event exists; replayed foreign edits that
            // race a delete are simply inert here.
            tx.execute(
                "UPDATE messages SET format = ?1, content = ?2, edited_at = ?3
                 WHERE message_id = ?4 AND deleted = 0",
                params![
                    p.body.format,
                    p.body.content,
                    fmt_ts(event.ts),
                    p.message_id.to_string(),
                ],
            )?;
        }
        EventPayload::MessageDelete(p) => {
            tx.execute(
                "UPDATE messages SET deleted = 1 WHERE message_id = ?1",
                params![p.message_id.to_string()],
            )?;
        }
        EventPayload::MessageRead(p) => {
            tx.execute(
                "INSERT OR REPLACE INTO message_reads (agent_id, message_id, read_at)
                 VALUES (?1, ?2, ?3)",
                params![event.actor_id, p.message_id.to_string(), fmt_ts(event.ts)],
            )?;
        }
        EventPayload::GroupCreate(p) => {
            // Keyed by group_id; a same-name create from another peer
            // coexists and the resolver unions members across ids.
            tx.execute(
                "INSERT OR REPLACE INTO groups
                 (group_id, name, description, created_at, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    p.group_id,
                    p.name,
                    p.description,
                    fmt_ts(event.ts),
                    event.actor_id,
                ],
            )?;
        }
        EventPayload::GroupAddMember(p) => {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, member_type, member_value)
                 VALUES (?1, ?2, ?3)",
                params![
                    p.group_id,
                    member_type_str(p.member.member_type),
                    p.member.member_value,
                ],
            )?;
        }
        EventPayload::GroupRemoveMember(p) => {
            tx.execute(
                "DELETE FROM group_members
                 WHERE group_id = ?1 AND member_type = ?2 AND member_value = ?3",
                params![
                    p.group_id,
                    member_type_str(p.member.member_type),
                    p.member.member_value,
                ],
            )?;
        }
        EventPayload::SubscriptionCreate(p) => {
            tx.execute(
                "INSERT OR REPLACE INTO subscriptions
                 (subscription_id, session_id, filter_type, selector, include_self, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    p.subscription_id,
                    p.session_id,
                    filter_type_str(p.filter.filter_type),
                    p.filter.selector,
                    p.filter.include_self as i64,
                    fmt_ts(event.ts),
                ],
            )?;
        }
        EventPayload::SubscriptionDelete(p) => {
            tx.execute(
                "DELETE FROM subscriptions WHERE subscription_id = ?1",
                params![p.subscription_id],
            )?;
        }
        EventPayload::Unknown => {
            // Recorded in applied_events above; nothing else to do.
        }
    }

    Ok(())
}

fn apply_message_create(
    tx: &Transaction,
    event: &Event,
    p: &thrum_types::event::MessageCreatePayload,
) -> Result<()> {
    let message_id = event.id.to_string();

    // Resolve the thread against the local projection: a projected parent
    // wins over the stamped value (the stamp is the sender's best-known
    // root and may predate parents we already hold).
    let (thread_id, reply_missing) = match &p.reply_to {
        Some(parent_id) => {
            let parent: Option<String> = tx
                .query_row(
                    "SELECT thread_id FROM messages WHERE message_id = ?1",
                    params![parent_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match parent {
                Some(parent_thread) => (parent_thread, false),
                None => (p.thread_id.to_string(), true),
            }
        }
        None => (p.thread_id.to_string(), false),
    };

    tx.execute(
        "INSERT OR IGNORE INTO messages
         (message_id, agent_id, created_at, format, content, thread_id,
          reply_to, reply_missing, deleted, edited_at, scopes, refs, audience)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9, ?10, ?11)",
        params![
            message_id,
            event.actor_id,
            fmt_ts(event.ts),
            p.body.format,
            p.body.content,
            thread_id,
            p.reply_to.map(|id| id.to_string()),
            reply_missing as i64,
            serde_json::to_string(&p.scopes).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&p.refs).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&p.audience).unwrap_or_else(|_| "[]".to_string()),
        ],
    )?;

    for recipient in &p.audience {
        tx.execute(
            "INSERT OR IGNORE INTO message_recipients (message_id, agent_id) VALUES (?1, ?2)",
            params![message_id, recipient],
        )?;
    }

    // This message may be the parent some earlier arrivals were waiting
    // for: promote them to replies and drag their subtrees onto our
    // thread root.
    promote_waiting_children(tx, &message_id, &thread_id)?;

    Ok(())
}

/// Re-root every descendant of `parent_id` onto `thread_id`; direct
/// children additionally lose their reply_missing flag.
fn promote_waiting_children(tx: &Transaction, parent_id: &str, thread_id: &str) -> Result<()> {
    tx.execute(
        "UPDATE messages SET reply_missing = 0 WHERE reply_to = ?1 AND reply_missing = 1",
        params![parent_id],
    )?;

    let mut level = vec![parent_id.to_string()];
    let mut depth = 0;
    while !level.is_empty() && depth < THREAD_WALK_CAP {
        let mut next = Vec::new();
        for id in &level {
            let mut stmt = tx.prepare_cached(
                "SELECT message_id FROM messages WHERE reply_to = ?1 AND thread_id != ?2",
            )?;
            let children: Vec<String> = stmt
                .query_map(params![id, thread_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for child in &children {
                tx.execute(
                    "UPDATE messages SET thread_id = ?1 WHERE message_id = ?2",
                    params![thread_id, child],
                )?;
            }
            next.extend(children);
        }
        level = next;
        depth += 1;
    }
    Ok(())
}

fn member_type_str(member_type: thrum_types::MemberType) -> &'static str {
    match member_type {
        thrum_types::MemberType::Agent => "agent",
        thrum_types::MemberType::Role => "role",
        thrum_types::MemberType::Group => "group",
    }
}

fn filter_type_str(filter_type: thrum_types::FilterType) -> &'static str {
    match filter_type {
        thrum_types::FilterType::All => "all",
        thrum_types::FilterType::Scope => "scope",
        thrum_types::FilterType::Mention => "mention",
        thrum_types::FilterType::Thread => "thread",
        thrum_types::FilterType::Author => "author",
    }
}
