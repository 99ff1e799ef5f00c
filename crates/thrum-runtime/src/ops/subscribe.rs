use std::time::Duration;

use thrum_engine::{CompiledFilter, MessageView};
use thrum_types::event::{
    EventPayload, SubscriptionCreatePayload, SubscriptionDeletePayload,
};
use thrum_types::{Error, EventKind, Result, SubscriptionFilter};
use ulid::Ulid;

use crate::daemon::{Daemon, DbDirectory};
use crate::hub::WaitOutcome;

impl Daemon {
    /// subscribe.create: register a live filter for a session. The event
    /// goes to the local-only shard; subscriptions never sync.
    pub async fn subscribe_create(
        &self,
        session_id: &str,
        agent_id: &str,
        filter: SubscriptionFilter,
    ) -> Result<String> {
        let compiled = self.compile_filter(&filter, agent_id)?;
        let subscription_id = format!("sub-{}", self.next_id().to_string().to_lowercase());
        self.hub().subscribe(session_id, &subscription_id, compiled)?;

        let event = self.new_event(
            EventKind::SubscriptionCreate,
            agent_id,
            &SubscriptionCreatePayload {
                subscription_id: subscription_id.clone(),
                session_id: session_id.to_string(),
                filter,
            },
        )?;
        self.append_and_project(&event).await?;
        Ok(subscription_id)
    }

    pub async fn subscribe_delete(
        &self,
        session_id: &str,
        agent_id: &str,
        subscription_id: &str,
    ) -> Result<()> {
        if !self.hub().unsubscribe(session_id, subscription_id) {
            return Err(Error::NotFound(format!("subscription {}", subscription_id)));
        }
        let event = self.new_event(
            EventKind::SubscriptionDelete,
            agent_id,
            &SubscriptionDeletePayload {
                subscription_id: subscription_id.to_string(),
            },
        )?;
        self.append_and_project(&event).await
    }

    /// wait: block until an event matches or the timeout elapses.
    ///
    /// With `since`, the log after that event id is replayed first, so a
    /// match that happened while the caller (or the daemon) was down is
    /// returned immediately instead of waiting for a new one.
    pub async fn wait(
        &self,
        agent_id: &str,
        filter: SubscriptionFilter,
        timeout: Duration,
        since: Option<Ulid>,
    ) -> Result<WaitOutcome> {
        let compiled = self.compile_filter(&filter, agent_id)?;

        if since.is_some() {
            let report = self.log().read_since(since)?;
            for event in &report.events {
                if event.kind != EventKind::MessageCreate {
                    continue;
                }
                let Ok(EventPayload::MessageCreate(payload)) =
                    EventPayload::decode(&event.kind, &event.payload)
                else {
                    continue;
                };
                let view = MessageView {
                    author: event.actor_id.clone(),
                    message_id: event.id.to_string(),
                    thread_id: payload.thread_id.to_string(),
                    scopes: payload.scopes,
                    audience: payload.audience,
                };
                if compiled.matches(agent_id, &view) {
                    let value = serde_json::to_value(event)
                        .map_err(|err| Error::Internal(err.to_string()))?;
                    return Ok(WaitOutcome::Match(value));
                }
            }
        }

        Ok(self.hub().wait(agent_id, compiled, timeout).await)
    }

    fn compile_filter(
        &self,
        filter: &SubscriptionFilter,
        agent_id: &str,
    ) -> Result<CompiledFilter> {
        let db = self.db().lock().expect("projection mutex poisoned");
        let directory = DbDirectory(&db);
        CompiledFilter::compile(filter, agent_id, &directory)
    }
}
