use thrum_index::{TeamMember, queries};
use thrum_types::{Error, Result};

use crate::daemon::Daemon;

impl Daemon {
    /// team.list: directory + open sessions + latest work contexts +
    /// unread inbox counts, merged in memory from two queries.
    pub fn team_list(&self) -> Result<Vec<TeamMember>> {
        let db = self.db().lock().expect("projection mutex poisoned");
        queries::team::team_list(&db).map_err(Error::from)
    }
}
