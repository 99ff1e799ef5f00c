use serde::Deserialize;
use thrum_index::{SessionRecord, queries};
use thrum_types::event::{SessionEndPayload, SessionSetIntentPayload, SessionStartPayload};
use thrum_types::{Error, EventKind, Result};

use crate::daemon::Daemon;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionStartParams {
    #[serde(default)]
    pub intent: Option<String>,
    /// Detached sessions stay open when the RPC connection drops
    #[serde(default)]
    pub detached: bool,
}

impl Daemon {
    /// session.start: opens a session for a registered agent. Starting
    /// while another session is open closes the prior one (the projector
    /// enforces the at-most-one-open invariant).
    pub async fn session_start(
        &self,
        agent_id: &str,
        params: SessionStartParams,
    ) -> Result<SessionRecord> {
        {
            let db = self.db().lock().expect("projection mutex poisoned");
            if queries::team::agent_get(&db, agent_id)
                .map_err(Error::from)?
                .is_none()
            {
                return Err(Error::NotFound(format!("agent {} is not registered", agent_id)));
            }
        }

        let session_id = self.next_id().to_string().to_lowercase();
        let event = self.new_event(
            EventKind::SessionStart,
            agent_id,
            &SessionStartPayload {
                session_id: session_id.clone(),
                intent: params.intent,
                detached: params.detached,
            },
        )?;
        self.append_and_project(&event).await?;

        let db = self.db().lock().expect("projection mutex poisoned");
        queries::team::session_get(&db, &session_id)
            .map_err(Error::from)?
            .ok_or_else(|| Error::Internal(format!("session {} not projected", session_id)))
    }

    /// session.end: close the given session, or the agent's open session
    /// when none is named.
    pub async fn session_end(&self, agent_id: &str, session_id: Option<&str>) -> Result<()> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => {
                let db = self.db().lock().expect("projection mutex poisoned");
                queries::team::open_session(&db, agent_id)
                    .map_err(Error::from)?
                    .ok_or_else(|| {
                        Error::State(format!("agent {} has no open session", agent_id))
                    })?
                    .session_id
            }
        };

        let event = self.new_event(
            EventKind::SessionEnd,
            agent_id,
            &SessionEndPayload {
                session_id: session_id.clone(),
            },
        )?;
        self.append_and_project(&event).await
    }

    pub async fn session_set_intent(
        &self,
        agent_id: &str,
        session_id: &str,
        intent: String,
    ) -> Result<()> {
        {
            let db = self.db().lock().expect("projection mutex poisoned");
            let session = queries::team::session_get(&db, session_id)
                .map_err(Error::from)?
                .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
            if session.agent_id != agent_id {
                return Err(Error::Auth(format!(
                    "session {} belongs to {}",
                    session_id, session.agent_id
                )));
            }
            if session.ended_at.is_some() {
                return Err(Error::State(format!("session {} has ended", session_id)));
            }
        }

        let event = self.new_event(
            EventKind::SessionSetIntent,
            agent_id,
            &SessionSetIntentPayload {
                session_id: session_id.to_string(),
                intent,
            },
        )?;
        self.append_and_project(&event).await
    }
}
