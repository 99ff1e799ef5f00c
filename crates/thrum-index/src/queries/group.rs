use rusqlite::Row;
use thrum_types::{GroupMember, MemberType};

use crate::records::GroupRecord;
use crate::{Database, Result};

/// All group ids carrying `name`. More than one entry means two peers
/// created the group independently; the resolver unions their members and
/// member mutation through the RPC surface reports a conflict.
pub fn group_ids_by_name(db: &Database, name: &str) -> Result<Vec<String>> {
    let mut stmt = db
        .conn
        .prepare("SELECT group_id FROM groups WHERE name = ?1 ORDER BY group_id")?;
    let ids = stmt
        .query_map([name], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn group_exists(db: &Database, name: &str) -> Result<bool> {
    let n: i64 = db
        .conn
        .query_row("SELECT COUNT(*) FROM groups WHERE name = ?1", [name], |row| {
            row.get(0)
        })?;
    Ok(n > 0)
}

pub fn members_of(db: &Database, group_id: &str) -> Result<Vec<GroupMember>> {
    let mut stmt = db.conn.prepare(
        "SELECT member_type, member_value FROM group_members
         WHERE group_id = ?1 ORDER BY member_type, member_value",
    )?;
    let members = stmt
        .query_map([group_id], row_to_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Member union across every group id that shares `name`.
pub fn members_by_name(db: &Database, name: &str) -> Result<Vec<GroupMember>> {
    let mut stmt = db.conn.prepare(
        "SELECT DISTINCT gm.member_type, gm.member_value
         FROM group_members gm
         JOIN groups g ON g.group_id = gm.group_id
         WHERE g.name = ?1
         ORDER BY gm.member_type, gm.member_value",
    )?;
    let members = stmt
        .query_map([name], row_to_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(members)
}

pub fn agents_with_role(db: &Database, role: &str) -> Result<Vec<String>> {
    let mut stmt = db
        .conn
        .prepare("SELECT agent_id FROM agents WHERE role = ?1 ORDER BY agent_id")?;
    let agents = stmt
        .query_map([role], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(agents)
}

pub fn all_agent_ids(db: &Database) -> Result<Vec<String>> {
    let mut stmt = db.conn.prepare("SELECT agent_id FROM agents ORDER BY agent_id")?;
    let agents = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(agents)
}

pub fn group_get(db: &Database, group_id: &str) -> Result<Option<GroupRecord>> {
    use rusqlite::OptionalExtension;
    let group = db
        .conn
        .query_row(
            "SELECT group_id, name, description, created_at, created_by
             FROM groups WHERE group_id = ?1",
            [group_id],
            row_to_group,
        )
        .optional()?;
    Ok(group)
}

pub fn list_groups(db: &Database) -> Result<Vec<GroupRecord>> {
    let mut stmt = db.conn.prepare(
        "SELECT group_id, name, description, created_at, created_by
         FROM groups ORDER BY name, group_id",
    )?;
    let groups = stmt
        .query_map([], row_to_group)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(groups)
}

fn row_to_member(row: &Row) -> rusqlite::Result<GroupMember> {
    let member_type: String = row.get(0)?;
    Ok(GroupMember {
        member_type: match member_type.as_str() {
            "role" => MemberType::Role,
            "group" => MemberType::Group,
            _ => MemberType::Agent,
        },
        member_value: row.get(1)?,
    })
}

fn row_to_group(row: &Row) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        group_id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        created_by: row.get(4)?,
    })
}
