use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Member kinds a group may contain. The role value `*` expands to every
/// known agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Agent,
    Role,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub member_type: MemberType,
    pub member_value: String,
}

impl GroupMember {
    pub fn agent(value: impl Into<String>) -> Self {
        Self {
            member_type: MemberType::Agent,
            member_value: value.into(),
        }
    }

    pub fn role(value: impl Into<String>) -> Self {
        Self {
            member_type: MemberType::Role,
            member_value: value.into(),
        }
    }

    pub fn group(value: impl Into<String>) -> Self {
        Self {
            member_type: MemberType::Group,
            member_value: value.into(),
        }
    }
}
