use std::collections::HashSet;

use thrum_types::{MemberType, Result};

use crate::directory::Directory;

/// Expands a group name into a deduplicated, ordered list of agent ids.
///
/// Depth-first over the member graph with a `visited` set keyed by group
/// name (cycle break: a group is expanded at most once, revisits are a
/// silent no-op) and a `seen` set keyed by agent id (dedup). Order is the
/// member declaration order of the walk, which makes expansion
/// deterministic for a given projection state.
pub struct GroupResolver<'a, D: Directory + ?Sized> {
    directory: &'a D,
}

impl<'a, D: Directory + ?Sized> GroupResolver<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    pub fn is_group(&self, name: &str) -> Result<bool> {
        self.directory.is_group(name)
    }

    pub fn expand(&self, name: &str) -> Result<Vec<String>> {
        let mut visited = HashSet::new();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.expand_into(name, &mut visited, &mut seen, &mut out)?;
        Ok(out)
    }

    fn expand_into(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        seen: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if !visited.insert(name.to_string()) {
            return Ok(());
        }

        for member in self.directory.group_members(name)? {
            match member.member_type {
                MemberType::Agent => {
                    if seen.insert(member.member_value.clone()) {
                        out.push(member.member_value);
                    }
                }
                MemberType::Role => {
                    let agents = if member.member_value == "*" {
                        self.directory.all_agent_ids()?
                    } else {
                        self.directory.agents_with_role(&member.member_value)?
                    };
                    for agent in agents {
                        if seen.insert(agent.clone()) {
                            out.push(agent);
                        }
                    }
                }
                MemberType::Group => {
                    self.expand_into(&member.member_value, visited, seen, out)?;
                }
            }
        }
        Ok(())
    }
}
