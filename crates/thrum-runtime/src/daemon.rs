use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use thrum_engine::{Directory, MessageView, ThreadInfo};
use thrum_index::queries::ProjectionStats;
use thrum_index::{CheckpointRecord, Database, queries};
use thrum_log::EventLog;
use thrum_sync::{SyncEngine, SyncHealth, SyncState, ensure_sync_worktree};
use thrum_types::{Error, Event, EventIdGen, EventKind, GroupMember, Result};
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::hub::SubscriptionHub;
use crate::paths::ThrumPaths;

/// Process-wide daemon state. One per repository; everything is
/// constructed from the repo root and explicit configuration so the whole
/// daemon embeds in tests.
pub struct Daemon {
    paths: ThrumPaths,
    config: Config,
    log: Arc<EventLog>,
    db: Arc<Mutex<Database>>,
    hub: Arc<SubscriptionHub>,
    sync: Option<SyncEngine>,
    ids: EventIdGen,
    started_at: Instant,
}

impl Daemon {
    /// Open (or create) the daemon state under `repo_root`, replay the
    /// log into the projection, and prepare the sync engine.
    ///
    /// Outside a git repository the daemon still runs: shards live under
    /// `.thrum/var/log/` and sync reports `offline`. Local messaging must
    /// never depend on sync.
    pub fn open(repo_root: impl Into<std::path::PathBuf>) -> Result<Arc<Self>> {
        let paths = ThrumPaths::resolve(repo_root)?;
        let config = Config::load_from(&paths.config_path())?;

        let synced_root = match ensure_sync_worktree(paths.repo_root(), &config.sync_branch) {
            Ok(worktree) => Some(worktree),
            Err(err) => {
                warn!(%err, "sync worktree unavailable; running local-only");
                None
            }
        };
        let log_root = synced_root
            .clone()
            .unwrap_or_else(|| paths.var_dir().join("log"));

        let log = Arc::new(EventLog::open(log_root, paths.var_dir())?);
        let mut db = Database::open(&paths.db_path())?;

        // Startup recovery: replay everything. The applied_events gate
        // makes this cheap when the projection is already current and a
        // full rebuild when the schema version bumped.
        let report = log.read_all()?;
        let replayed = db.apply_batch(&report.events)?;
        if !replayed.is_empty() {
            info!(count = replayed.len(), "replayed events into projection");
        }

        let db = Arc::new(Mutex::new(db));
        let hub = Arc::new(SubscriptionHub::new());

        let sync = synced_root.map(|worktree| {
            let sink_db = db.clone();
            let sink_hub = hub.clone();
            SyncEngine::new(
                worktree,
                config.sync_config(),
                log.clone(),
                db.clone(),
                Box::new(move |events: &[Event]| {
                    for event in events {
                        fan_out(&sink_db, &sink_hub, event);
                    }
                }),
            )
        });

        Ok(Arc::new(Self {
            paths,
            config,
            log,
            db,
            hub,
            sync,
            ids: EventIdGen::new(),
            started_at: Instant::now(),
        }))
    }

    /// Start background workers (the sync loop).
    pub fn start_background(&self) -> Result<()> {
        if let Some(sync) = &self.sync {
            sync.start().map_err(Error::from)?;
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Some(sync) = &self.sync {
            sync.shutdown();
        }
    }

    /// Run one sync cycle on the caller's thread. Used by tests and by
    /// surfaces that want an immediate exchange instead of waiting out
    /// the interval.
    pub fn sync_now(&self) {
        if let Some(sync) = &self.sync {
            sync.run_cycle();
        }
    }

    pub fn paths(&self) -> &ThrumPaths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    pub(crate) fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub(crate) fn db(&self) -> &Arc<Mutex<Database>> {
        &self.db
    }

    pub(crate) fn next_id(&self) -> Ulid {
        self.ids.next()
    }

    pub(crate) fn new_event<P: Serialize>(
        &self,
        kind: EventKind,
        actor_id: &str,
        payload: &P,
    ) -> Result<Event> {
        let payload = serde_json::to_value(payload)
            .map_err(|err| Error::Internal(format!("payload encoding failed: {}", err)))?;
        Ok(Event::new(self.next_id(), kind, actor_id, payload))
    }

    pub(crate) fn new_event_with_id<P: Serialize>(
        &self,
        id: Ulid,
        kind: EventKind,
        actor_id: &str,
        payload: &P,
    ) -> Result<Event> {
        let payload = serde_json::to_value(payload)
            .map_err(|err| Error::Internal(format!("payload encoding failed: {}", err)))?;
        Ok(Event {
            id,
            kind,
            actor_id: actor_id.to_string(),
            ts: chrono::Utc::now(),
            payload,
        })
    }

    /// The write path every op goes through: durable append, projection,
    /// fan-out. Events are never rolled back; by the time this returns
    /// Ok the event is on disk.
    pub(crate) async fn append_and_project(&self, event: &Event) -> Result<()> {
        self.log.append(event).await?;
        {
            let mut db = self.db.lock().expect("projection mutex poisoned");
            db.apply_event(event)?;
        }
        fan_out(&self.db, &self.hub, event);
        Ok(())
    }

    pub fn health(&self) -> Result<HealthReport> {
        let db = self.db.lock().expect("projection mutex poisoned");
        let projection = queries::stats(&db)?;
        let checkpoints = queries::checkpoint::list(&db)?;
        drop(db);

        let sync = self.sync.as_ref().map(|engine| engine.health());
        let sync_state = sync
            .as_ref()
            .map(|h| h.state)
            .unwrap_or(SyncState::Offline);

        Ok(HealthReport {
            status: "ok".to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            sync_state,
            sync,
            projection,
            corrupt_lines: self.log.corrupt_line_count(),
            dropped_notifications: self.hub.dropped_total(),
            checkpoints,
        })
    }
}

/// health.get response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub uptime_secs: u64,
    pub sync_state: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncHealth>,
    pub projection: ProjectionStats,
    pub corrupt_lines: u64,
    pub dropped_notifications: u64,
    pub checkpoints: Vec<CheckpointRecord>,
}

/// Push one projected event to matching subscribers. Message kinds only;
/// the view comes from the projection so edits/deletes carry the create's
/// scopes and audience.
pub(crate) fn fan_out(db: &Arc<Mutex<Database>>, hub: &SubscriptionHub, event: &Event) {
    let message_id = match &event.kind {
        EventKind::MessageCreate => event.id.to_string(),
        EventKind::MessageEdit | EventKind::MessageDelete => {
            match event.payload.get("message_id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => return,
            }
        }
        _ => return,
    };

    let record = {
        let db = db.lock().expect("projection mutex poisoned");
        queries::message::get(&db, &message_id)
    };
    let record = match record {
        Ok(Some(record)) => record,
        Ok(None) => return,
        Err(err) => {
            warn!(%err, %message_id, "fan-out skipped: projection read failed");
            return;
        }
    };

    let view = MessageView {
        author: record.agent_id,
        message_id: record.message_id,
        thread_id: record.thread_id,
        scopes: record.scopes,
        audience: record.audience,
    };
    hub.publish(event, &view);
}

/// Projection-backed [`Directory`] for the routing engine. Borrows a
/// locked database, so lock scope stays visible at the call site.
pub(crate) struct DbDirectory<'a>(pub &'a Database);

impl Directory for DbDirectory<'_> {
    fn is_group(&self, name: &str) -> Result<bool> {
        queries::group::group_exists(self.0, name).map_err(Error::from)
    }

    fn group_members(&self, name: &str) -> Result<Vec<GroupMember>> {
        queries::group::members_by_name(self.0, name).map_err(Error::from)
    }

    fn agents_with_role(&self, role: &str) -> Result<Vec<String>> {
        queries::group::agents_with_role(self.0, role).map_err(Error::from)
    }

    fn all_agent_ids(&self) -> Result<Vec<String>> {
        queries::group::all_agent_ids(self.0).map_err(Error::from)
    }

    fn thread_info(&self, message_id: &Ulid) -> Result<Option<ThreadInfo>> {
        let info = queries::message::thread_info(self.0, &message_id.to_string())
            .map_err(Error::from)?;
        match info {
            Some((thread_id, deleted)) => {
                let thread_id = thread_id
                    .parse()
                    .map_err(|_| Error::Internal(format!("bad thread id {}", thread_id)))?;
                Ok(Some(ThreadInfo { thread_id, deleted }))
            }
            None => Ok(None),
        }
    }
}
