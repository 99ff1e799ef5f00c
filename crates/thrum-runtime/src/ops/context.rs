use thrum_types::Result;

use crate::context_store;
use crate::daemon::Daemon;

impl Daemon {
    /// context.save: stash narrative working notes for recovery after a
    /// restart or compaction. Local-only.
    pub fn context_save(&self, agent_id: &str, content: &str) -> Result<()> {
        context_store::save_context(self.paths(), agent_id, content)
    }

    pub fn context_get(&self, agent_id: &str) -> Result<Option<String>> {
        context_store::load_context(self.paths(), agent_id)
    }
}
