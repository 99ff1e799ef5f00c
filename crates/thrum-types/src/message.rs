use serde::{Deserialize, Serialize};

/// Message body; `format` is free-form ("text", "markdown", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub format: String,
    pub content: String,
}

impl MessageBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            format: "text".to_string(),
            content: content.into(),
        }
    }
}

/// Filtering tag attached to a message, e.g. `{type: "project", value: "thrum"}`.
///
/// Scopes are indexing metadata only; they never influence delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub scope_type: String,
    pub value: String,
}

impl Scope {
    pub fn new(scope_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scope_type: scope_type.into(),
            value: value.into(),
        }
    }
}

/// Typed pointer inside a message. Agent and group refs drive delivery;
/// file and url refs are carried for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Agent,
    Group,
    File,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    #[serde(rename = "type")]
    pub ref_type: RefType,
    pub value: String,
}

impl Ref {
    pub fn agent(value: impl Into<String>) -> Self {
        Self {
            ref_type: RefType::Agent,
            value: value.into(),
        }
    }

    pub fn group(value: impl Into<String>) -> Self {
        Self {
            ref_type: RefType::Group,
            value: value.into(),
        }
    }
}

/// Subscription filter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    All,
    Scope,
    Mention,
    Thread,
    Author,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_wire_shape() {
        let scope = Scope::new("project", "thrum");
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json, serde_json::json!({"type": "project", "value": "thrum"}));
    }

    #[test]
    fn test_ref_type_lowercase() {
        let reference = Ref::group("reviewers");
        let json = serde_json::to_string(&reference).unwrap();
        assert!(json.contains(r#""type":"group""#));
    }
}
