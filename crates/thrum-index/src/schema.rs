use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

// NOTE: Projection Design Rationale
//
// Why drop-and-rebuild instead of migrations?
// - The JSONL log is the source of truth; every table here is derived
// - A full replay is deterministic, so rebuilding on version mismatch is
//   always correct and removes a whole class of migration bugs
//
// Why an applied_events gate table?
// - Sync re-pulls the same shards repeatedly; INSERT OR IGNORE on the
//   event id makes every apply idempotent
// - Unknown kinds still get a row, so a newer peer's events survive a
//   rollback and are never re-examined on every cycle
//
// Why denormalized JSON columns (scopes/refs/audience/changes)?
// - They are read back whole, never joined on; recipients get their own
//   table because inbox counts group by recipient

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS applied_events (
            event_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agents (
            agent_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            role TEXT NOT NULL,
            module TEXT NOT NULL,
            display TEXT,
            hostname TEXT,
            registered_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            ended_at TEXT,
            intent TEXT,
            detached INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS work_contexts (
            session_id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            branch TEXT NOT NULL,
            worktree TEXT NOT NULL,
            intent TEXT,
            task_id TEXT,
            unmerged_commits INTEGER NOT NULL DEFAULT 0,
            changes TEXT NOT NULL DEFAULT '[]',
            git_updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            format TEXT NOT NULL,
            content TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            reply_to TEXT,
            reply_missing INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            edited_at TEXT,
            scopes TEXT NOT NULL DEFAULT '[]',
            refs TEXT NOT NULL DEFAULT '[]',
            audience TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS message_recipients (
            message_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            PRIMARY KEY (message_id, agent_id)
        );

        CREATE TABLE IF NOT EXISTS message_reads (
            agent_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            read_at TEXT NOT NULL,
            PRIMARY KEY (agent_id, message_id)
        );

        CREATE TABLE IF NOT EXISTS groups (
            group_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id TEXT NOT NULL,
            member_type TEXT NOT NULL,
            member_value TEXT NOT NULL,
            PRIMARY KEY (group_id, member_type, member_value)
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            subscription_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            filter_type TEXT NOT NULL,
            selector TEXT,
            include_self INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            peer_id TEXT PRIMARY KEY,
            last_ack_event_id TEXT,
            last_ack_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(agent_id);
        CREATE INDEX IF NOT EXISTS idx_messages_reply ON messages(reply_to);
        CREATE INDEX IF NOT EXISTS idx_recipients_agent ON message_recipients(agent_id);
        CREATE INDEX IF NOT EXISTS idx_agents_role ON agents(role);
        CREATE INDEX IF NOT EXISTS idx_sessions_open ON sessions(agent_id) WHERE ended_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_groups_name ON groups(name);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS sync_checkpoints;
        DROP TABLE IF EXISTS subscriptions;
        DROP TABLE IF EXISTS group_members;
        DROP TABLE IF EXISTS groups;
        DROP TABLE IF EXISTS message_reads;
        DROP TABLE IF EXISTS message_recipients;
        DROP TABLE IF EXISTS messages;
        DROP TABLE IF EXISTS work_contexts;
        DROP TABLE IF EXISTS sessions;
        DROP TABLE IF EXISTS agents;
        DROP TABLE IF EXISTS applied_events;
        "#,
    )?;
    Ok(())
}
