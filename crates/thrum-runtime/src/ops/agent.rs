use serde::Deserialize;
use thrum_index::{AgentRecord, queries};
use thrum_types::event::{AgentHeartbeatPayload, AgentRegisterPayload, WorkContextUpdatePayload};
use thrum_types::{Agent, AgentKind, Error, EventKind, Result};

use crate::daemon::Daemon;
use crate::identity::{default_hostname, load_identity, save_identity};
use crate::work_context::capture_work_context;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterParams {
    /// Stable id; generated when absent, reused from the identity file
    /// when one exists.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub kind: Option<AgentKind>,
    #[serde(default)]
    pub role: Option<String>,
    /// Usually a branch name; defaults to the current branch
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
}

impl Daemon {
    /// agent.register: announce (or re-announce) an identity. The
    /// projection keeps the earliest registration; the identity file
    /// makes the id portable across sessions.
    pub async fn register_agent(&self, params: RegisterParams) -> Result<AgentRecord> {
        let agent_id = params
            .agent_id
            .clone()
            .unwrap_or_else(|| format!("agent-{}", self.next_id().to_string().to_lowercase()));

        let existing = load_identity(self.paths(), &agent_id)?;
        let kind = params
            .kind
            .or(existing.as_ref().map(|a| a.kind))
            .unwrap_or(AgentKind::Agent);
        let role = params
            .role
            .or(existing.as_ref().map(|a| a.role.clone()))
            .unwrap_or_else(|| "implementer".to_string());
        let module = params
            .module
            .or(existing.as_ref().map(|a| a.module.clone()))
            .unwrap_or_else(|| current_branch(self).unwrap_or_else(|| "main".to_string()));
        let display = params.display.or(existing.as_ref().and_then(|a| a.display.clone()));
        let hostname = default_hostname();

        let payload = AgentRegisterPayload {
            agent_id: agent_id.clone(),
            kind,
            role: role.clone(),
            module: module.clone(),
            display: display.clone(),
            hostname: Some(hostname.clone()),
        };
        let event = self.new_event(EventKind::AgentRegister, &agent_id, &payload)?;
        self.append_and_project(&event).await?;

        save_identity(
            self.paths(),
            &Agent {
                agent_id: agent_id.clone(),
                kind,
                role,
                module,
                display,
                hostname: Some(hostname),
                registered_at: event.ts,
            },
        )?;

        let db = self.db().lock().expect("projection mutex poisoned");
        queries::team::agent_get(&db, &agent_id)
            .map_err(Error::from)?
            .ok_or_else(|| Error::Internal(format!("agent {} not projected", agent_id)))
    }

    pub fn agent_list(&self) -> Result<Vec<AgentRecord>> {
        let db = self.db().lock().expect("projection mutex poisoned");
        queries::team::agent_list(&db).map_err(Error::from)
    }

    /// agent.heartbeat: bumps last_seen_at and overwrites the session's
    /// work context with a fresh git snapshot.
    pub async fn heartbeat(&self, agent_id: &str, session_id: &str) -> Result<()> {
        let session = {
            let db = self.db().lock().expect("projection mutex poisoned");
            queries::team::session_get(&db, session_id).map_err(Error::from)?
        };
        let session =
            session.ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        if session.agent_id != agent_id {
            return Err(Error::Auth(format!(
                "session {} belongs to {}",
                session_id, session.agent_id
            )));
        }
        if session.ended_at.is_some() {
            return Err(Error::State(format!("session {} has ended", session_id)));
        }

        let heartbeat = self.new_event(
            EventKind::AgentHeartbeat,
            agent_id,
            &AgentHeartbeatPayload {
                session_id: session_id.to_string(),
            },
        )?;
        self.append_and_project(&heartbeat).await?;

        let worktree = self.paths().repo_root().to_path_buf();
        let intent = session.intent.clone();
        let context =
            tokio::task::spawn_blocking(move || capture_work_context(&worktree, intent, None))
                .await
                .map_err(|err| Error::Internal(format!("work context capture failed: {}", err)))?;

        let update = self.new_event(
            EventKind::WorkContextUpdate,
            agent_id,
            &WorkContextUpdatePayload {
                session_id: session_id.to_string(),
                context,
            },
        )?;
        self.append_and_project(&update).await?;
        Ok(())
    }
}

fn current_branch(daemon: &Daemon) -> Option<String> {
    let context = capture_work_context(daemon.paths().repo_root(), None, None);
    if context.branch.is_empty() {
        None
    } else {
        Some(context.branch)
    }
}
