use thrum_types::{FilterType, Result, Scope, SubscriptionFilter};

use crate::directory::Directory;
use crate::groups::GroupResolver;

/// Projection-level view of a message event handed to filter matching.
/// Built by the hub from the projected row, so edits and deletes carry
/// the same scopes/audience as the create did.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub author: String,
    pub message_id: String,
    pub thread_id: String,
    pub scopes: Vec<Scope>,
    pub audience: Vec<String>,
}

/// A subscription filter with its selector resolved against the group
/// directory at subscribe time, so matching itself is pure and O(small).
#[derive(Debug, Clone)]
pub enum CompiledFilter {
    All {
        include_self: bool,
    },
    Scope {
        scope_type: String,
        /// `*` matches any value (wildcard is legal on the value position only)
        value: String,
    },
    Mention {
        targets: Vec<String>,
    },
    Thread {
        thread_id: String,
    },
    Author {
        author: String,
    },
}

impl CompiledFilter {
    /// Resolve `filter` for a subscriber. Mention selectors naming a group
    /// expand to the group's current members; an absent mention selector
    /// means "mentions of me".
    pub fn compile(
        filter: &SubscriptionFilter,
        subscriber_agent: &str,
        directory: &dyn Directory,
    ) -> Result<Self> {
        let compiled = match filter.filter_type {
            FilterType::All => CompiledFilter::All {
                include_self: filter.include_self,
            },
            FilterType::Scope => {
                let selector = filter.selector.as_deref().unwrap_or("");
                let (scope_type, value) = selector.split_once(':').unwrap_or((selector, "*"));
                CompiledFilter::Scope {
                    scope_type: scope_type.to_string(),
                    value: value.to_string(),
                }
            }
            FilterType::Mention => {
                let selector = filter
                    .selector
                    .clone()
                    .unwrap_or_else(|| subscriber_agent.to_string());
                let resolver = GroupResolver::new(directory);
                let targets = if resolver.is_group(&selector)? {
                    resolver.expand(&selector)?
                } else {
                    vec![selector]
                };
                CompiledFilter::Mention { targets }
            }
            FilterType::Thread => CompiledFilter::Thread {
                thread_id: filter.selector.clone().unwrap_or_default(),
            },
            FilterType::Author => CompiledFilter::Author {
                author: filter.selector.clone().unwrap_or_default(),
            },
        };
        Ok(compiled)
    }

    pub fn matches(&self, subscriber_agent: &str, view: &MessageView) -> bool {
        match self {
            CompiledFilter::All { include_self } => {
                *include_self || view.author != subscriber_agent
            }
            CompiledFilter::Scope { scope_type, value } => view
                .scopes
                .iter()
                .any(|s| s.scope_type == *scope_type && (value == "*" || s.value == *value)),
            CompiledFilter::Mention { targets } => {
                targets.iter().any(|t| view.audience.contains(t))
            }
            CompiledFilter::Thread { thread_id } => view.thread_id == *thread_id,
            CompiledFilter::Author { author } => view.author == *author,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::FakeDirectory;
    use thrum_types::GroupMember;

    fn view(author: &str, audience: &[&str]) -> MessageView {
        MessageView {
            author: author.to_string(),
            message_id: "m1".to_string(),
            thread_id: "t1".to_string(),
            scopes: vec![Scope::new("project", "thrum")],
            audience: audience.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn compile(filter_type: FilterType, selector: Option<&str>, subscriber: &str) -> CompiledFilter {
        let dir = FakeDirectory::with_agents(&[]);
        CompiledFilter::compile(
            &SubscriptionFilter {
                filter_type,
                selector: selector.map(|s| s.to_string()),
                include_self: false,
            },
            subscriber,
            &dir,
        )
        .unwrap()
    }

    #[test]
    fn test_all_excludes_own_messages() {
        let filter = compile(FilterType::All, None, "alice");
        assert!(!filter.matches("alice", &view("alice", &[])));
        assert!(filter.matches("alice", &view("bob", &[])));

        let dir = FakeDirectory::with_agents(&[]);
        let with_self = CompiledFilter::compile(
            &SubscriptionFilter {
                filter_type: FilterType::All,
                selector: None,
                include_self: true,
            },
            "alice",
            &dir,
        )
        .unwrap();
        assert!(with_self.matches("alice", &view("alice", &[])));
    }

    #[test]
    fn test_scope_filter_with_wildcard_value() {
        let exact = compile(FilterType::Scope, Some("project:thrum"), "alice");
        assert!(exact.matches("alice", &view("bob", &[])));

        let wildcard = compile(FilterType::Scope, Some("project:*"), "alice");
        assert!(wildcard.matches("alice", &view("bob", &[])));

        let miss = compile(FilterType::Scope, Some("task:xyz"), "alice");
        assert!(!miss.matches("alice", &view("bob", &[])));
    }

    #[test]
    fn test_mention_defaults_to_subscriber() {
        let filter = compile(FilterType::Mention, None, "alice");
        assert!(filter.matches("alice", &view("bob", &["alice"])));
        assert!(!filter.matches("alice", &view("bob", &["carol"])));
    }

    #[test]
    fn test_mention_group_selector_expands() {
        let mut dir = FakeDirectory::with_agents(&["alice", "bob"]);
        dir.add_group(
            "reviewers",
            vec![GroupMember::agent("alice"), GroupMember::agent("bob")],
        );
        let filter = CompiledFilter::compile(
            &SubscriptionFilter {
                filter_type: FilterType::Mention,
                selector: Some("reviewers".to_string()),
                include_self: false,
            },
            "carol",
            &dir,
        )
        .unwrap();
        assert!(filter.matches("carol", &view("dave", &["bob"])));
        assert!(!filter.matches("carol", &view("dave", &["dave"])));
    }

    #[test]
    fn test_thread_and_author_filters() {
        let thread = compile(FilterType::Thread, Some("t1"), "alice");
        assert!(thread.matches("alice", &view("bob", &[])));

        let author = compile(FilterType::Author, Some("bob"), "alice");
        assert!(author.matches("alice", &view("bob", &[])));
        assert!(!author.matches("alice", &view("carol", &[])));
    }
}
