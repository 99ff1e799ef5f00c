use thrum_engine::GroupResolver;
use thrum_index::{GroupRecord, queries};
use thrum_types::event::{GroupCreatePayload, GroupMemberPayload};
use thrum_types::{Error, EventKind, GroupMember, Result};

use crate::daemon::{Daemon, DbDirectory};

/// Group names share the mention charset so `@name` always tokenizes.
fn validate_group_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "group name {:?} must be non-empty and use [A-Za-z0-9._-]",
            name
        )))
    }
}

impl Daemon {
    pub async fn group_create(
        &self,
        actor: &str,
        name: &str,
        description: &str,
    ) -> Result<GroupRecord> {
        validate_group_name(name)?;
        {
            let db = self.db().lock().expect("projection mutex poisoned");
            if queries::group::group_exists(&db, name).map_err(Error::from)? {
                return Err(Error::Conflict(format!("group {} already exists", name)));
            }
        }

        let group_id = format!("grp-{}", self.next_id().to_string().to_lowercase());
        let event = self.new_event(
            EventKind::GroupCreate,
            actor,
            &GroupCreatePayload {
                group_id: group_id.clone(),
                name: name.to_string(),
                description: description.to_string(),
            },
        )?;
        self.append_and_project(&event).await?;

        let db = self.db().lock().expect("projection mutex poisoned");
        queries::group::group_get(&db, &group_id)
            .map_err(Error::from)?
            .ok_or_else(|| Error::Internal(format!("group {} not projected", group_id)))
    }

    pub async fn group_add_member(
        &self,
        actor: &str,
        name: &str,
        member: GroupMember,
    ) -> Result<()> {
        let group_id = self.resolve_single_group(name)?;
        if member.member_value.is_empty() {
            return Err(Error::Validation("member value must be non-empty".to_string()));
        }

        let event = self.new_event(
            EventKind::GroupAddMember,
            actor,
            &GroupMemberPayload {
                group_id,
                name: name.to_string(),
                member,
            },
        )?;
        self.append_and_project(&event).await
    }

    pub async fn group_remove_member(
        &self,
        actor: &str,
        name: &str,
        member: GroupMember,
    ) -> Result<()> {
        let group_id = self.resolve_single_group(name)?;
        let event = self.new_event(
            EventKind::GroupRemoveMember,
            actor,
            &GroupMemberPayload {
                group_id,
                name: name.to_string(),
                member,
            },
        )?;
        self.append_and_project(&event).await
    }

    /// Deduplicated agent expansion of a group name.
    pub fn group_expand(&self, name: &str) -> Result<Vec<String>> {
        let db = self.db().lock().expect("projection mutex poisoned");
        let directory = DbDirectory(&db);
        if !queries::group::group_exists(&db, name).map_err(Error::from)? {
            return Err(Error::NotFound(format!("group {}", name)));
        }
        GroupResolver::new(&directory).expand(name)
    }

    pub fn group_list(&self) -> Result<Vec<GroupRecord>> {
        let db = self.db().lock().expect("projection mutex poisoned");
        queries::group::list_groups(&db).map_err(Error::from)
    }

    pub fn group_members(&self, name: &str) -> Result<Vec<GroupMember>> {
        let db = self.db().lock().expect("projection mutex poisoned");
        queries::group::members_by_name(&db, name).map_err(Error::from)
    }

    /// Member mutation requires an unambiguous group id. Two peers
    /// creating the same name independently leaves the name mapping to
    /// several ids; that is surfaced as a conflict rather than silently
    /// picking one.
    fn resolve_single_group(&self, name: &str) -> Result<String> {
        let db = self.db().lock().expect("projection mutex poisoned");
        let mut ids = queries::group::group_ids_by_name(&db, name).map_err(Error::from)?;
        match ids.len() {
            0 => Err(Error::NotFound(format!("group {}", name))),
            1 => Ok(ids.remove(0)),
            n => Err(Error::Conflict(format!(
                "group name {} maps to {} distinct group ids; resolve the duplicate first",
                name, n
            ))),
        }
    }
}
