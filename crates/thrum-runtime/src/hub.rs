use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use thrum_engine::{CompiledFilter, MessageView};
use thrum_types::{Error, Event, Result};
use tokio::sync::{Notify, oneshot};
use tracing::debug;

/// Bounded per-session notification queue (default capacity).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One server→client push: a JSON-RPC notification body.
#[derive(Debug, Clone)]
pub struct Notification {
    pub method: String,
    pub params: serde_json::Value,
}

// NOTE: Back-pressure policy
//
// Pushes never block the publisher. Each session has one bounded queue;
// overflow drops the OLDEST entry and counts it, and the next pop emits a
// subscription.dropped notice before any queued event. A stalled client
// therefore costs at most `capacity` buffered notifications and learns
// exactly how much it missed; it can re-read from the projection.

pub struct SessionQueue {
    buf: Mutex<VecDeque<Notification>>,
    notify: Notify,
    capacity: usize,
    dropped_pending: AtomicU64,
    closed: AtomicBool,
    hub_dropped_total: Arc<AtomicU64>,
}

impl SessionQueue {
    fn new(capacity: usize, hub_dropped_total: Arc<AtomicU64>) -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            dropped_pending: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            hub_dropped_total,
        })
    }

    pub fn push(&self, notification: Notification) {
        {
            let mut buf = self.buf.lock().expect("queue mutex poisoned");
            if buf.len() >= self.capacity {
                buf.pop_front();
                self.dropped_pending.fetch_add(1, Ordering::Relaxed);
                self.hub_dropped_total.fetch_add(1, Ordering::Relaxed);
            }
            buf.push_back(notification);
        }
        self.notify.notify_one();
    }

    /// Next notification; `None` once the session is closed and the queue
    /// has drained. A pending drop count is reported before queued events
    /// so the client knows about the gap as early as possible.
    pub async fn next(&self) -> Option<Notification> {
        loop {
            let pending = self.dropped_pending.swap(0, Ordering::Relaxed);
            if pending > 0 {
                return Some(Notification {
                    method: "subscription.dropped".to_string(),
                    params: json!({ "dropped": pending }),
                });
            }
            if let Some(notification) = self
                .buf
                .lock()
                .expect("queue mutex poisoned")
                .pop_front()
            {
                return Some(notification);
            }
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

struct HubSubscription {
    subscription_id: String,
    compiled: CompiledFilter,
}

struct SessionEntry {
    agent_id: String,
    queue: Arc<SessionQueue>,
    subs: Vec<HubSubscription>,
}

struct Waiter {
    id: u64,
    agent_id: String,
    compiled: CompiledFilter,
    tx: Option<oneshot::Sender<serde_json::Value>>,
}

/// Outcome of the `wait` primitive: the timeout is a sentinel, not an
/// error.
#[derive(Debug)]
pub enum WaitOutcome {
    Match(serde_json::Value),
    TimedOut,
}

/// Matches projected message events to live subscribers and pushes them.
pub struct SubscriptionHub {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    waiters: Mutex<Vec<Waiter>>,
    waiter_seq: AtomicU64,
    dropped_total: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            waiters: Mutex::new(Vec::new()),
            waiter_seq: AtomicU64::new(0),
            dropped_total: Arc::new(AtomicU64::new(0)),
            queue_capacity,
        }
    }

    pub fn register_session(&self, session_id: &str, agent_id: &str) -> Arc<SessionQueue> {
        let queue = SessionQueue::new(self.queue_capacity, self.dropped_total.clone());
        let mut sessions = self.sessions.lock().expect("hub mutex poisoned");
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                agent_id: agent_id.to_string(),
                queue: queue.clone(),
                subs: Vec::new(),
            },
        );
        queue
    }

    /// Close the session's queue (drain-then-discard on the consumer
    /// side) and forget its subscriptions.
    pub fn close_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("hub mutex poisoned");
        if let Some(entry) = sessions.remove(session_id) {
            entry.queue.close();
        }
    }

    pub fn subscribe(
        &self,
        session_id: &str,
        subscription_id: &str,
        compiled: CompiledFilter,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().expect("hub mutex poisoned");
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("no live session {}", session_id)))?;
        entry.subs.push(HubSubscription {
            subscription_id: subscription_id.to_string(),
            compiled,
        });
        Ok(())
    }

    pub fn unsubscribe(&self, session_id: &str, subscription_id: &str) -> bool {
        let mut sessions = self.sessions.lock().expect("hub mutex poisoned");
        if let Some(entry) = sessions.get_mut(session_id) {
            let before = entry.subs.len();
            entry.subs.retain(|s| s.subscription_id != subscription_id);
            return entry.subs.len() != before;
        }
        false
    }

    /// Fan a projected message event out to every matching subscription
    /// and waiter. Non-blocking; called from RPC handlers and from the
    /// sync worker thread alike.
    pub fn publish(&self, event: &Event, view: &MessageView) {
        let event_json = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(err) => {
                debug!(%err, "unserializable event skipped in fan-out");
                return;
            }
        };

        {
            let sessions = self.sessions.lock().expect("hub mutex poisoned");
            for entry in sessions.values() {
                for sub in &entry.subs {
                    if sub.compiled.matches(&entry.agent_id, view) {
                        entry.queue.push(Notification {
                            method: "subscription.event".to_string(),
                            params: json!({
                                "subscription_id": sub.subscription_id,
                                "event": event_json,
                            }),
                        });
                    }
                }
            }
        }

        let mut waiters = self.waiters.lock().expect("hub mutex poisoned");
        for waiter in waiters.iter_mut() {
            if waiter.tx.is_some() && waiter.compiled.matches(&waiter.agent_id, view) {
                if let Some(tx) = waiter.tx.take() {
                    let _ = tx.send(event_json.clone());
                }
            }
        }
        waiters.retain(|w| w.tx.is_some());
    }

    /// Block until an event matches `compiled` or the timeout elapses.
    /// Implemented as a transient subscription slot, exactly like the RPC
    /// surface describes it.
    pub async fn wait(
        &self,
        agent_id: &str,
        compiled: CompiledFilter,
        timeout: Duration,
    ) -> WaitOutcome {
        let (tx, rx) = oneshot::channel();
        let id = self.waiter_seq.fetch_add(1, Ordering::Relaxed);
        self.waiters
            .lock()
            .expect("hub mutex poisoned")
            .push(Waiter {
                id,
                agent_id: agent_id.to_string(),
                compiled,
                tx: Some(tx),
            });

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => WaitOutcome::Match(event),
            _ => WaitOutcome::TimedOut,
        };

        self.waiters
            .lock()
            .expect("hub mutex poisoned")
            .retain(|w| w.id != id);
        outcome
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.lock().expect("hub mutex poisoned").len()
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use thrum_types::EventKind;
    use ulid::Ulid;

    fn message_event(author: &str) -> (Event, MessageView) {
        let id = Ulid::new();
        let event = Event::new(id, EventKind::MessageCreate, author, json!({}));
        let view = MessageView {
            author: author.to_string(),
            message_id: id.to_string(),
            thread_id: id.to_string(),
            scopes: vec![],
            audience: vec!["bob".to_string()],
        };
        (event, view)
    }

    fn all_filter() -> CompiledFilter {
        CompiledFilter::All {
            include_self: false,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscription() {
        let hub = SubscriptionHub::new();
        let queue = hub.register_session("s1", "bob");
        hub.subscribe("s1", "sub1", all_filter()).unwrap();

        let (event, view) = message_event("alice");
        hub.publish(&event, &view);

        let notification = queue.next().await.unwrap();
        assert_eq!(notification.method, "subscription.event");
        assert_eq!(notification.params["subscription_id"], "sub1");
        assert_eq!(notification.params["event"]["actor_id"], "alice");
    }

    #[tokio::test]
    async fn test_own_messages_filtered_out() {
        let hub = SubscriptionHub::new();
        let queue = hub.register_session("s1", "alice");
        hub.subscribe("s1", "sub1", all_filter()).unwrap();

        let (event, view) = message_event("alice");
        hub.publish(&event, &view);
        hub.close_session("s1");

        // Only the drain-end None; nothing was queued.
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_notifies() {
        let hub = SubscriptionHub::with_capacity(3);
        let queue = hub.register_session("s1", "bob");
        hub.subscribe("s1", "sub1", all_filter()).unwrap();

        for _ in 0..5 {
            let (event, view) = message_event("alice");
            hub.publish(&event, &view);
        }

        // First pop reports the gap, then the newest 3 events follow.
        let first = queue.next().await.unwrap();
        assert_eq!(first.method, "subscription.dropped");
        assert_eq!(first.params["dropped"], 2);

        let mut events = 0;
        hub.close_session("s1");
        while let Some(n) = queue.next().await {
            assert_eq!(n.method, "subscription.event");
            events += 1;
        }
        assert_eq!(events, 3);
        assert_eq!(hub.dropped_total(), 2);
    }

    #[tokio::test]
    async fn test_prompt_reader_never_drops() {
        let hub = SubscriptionHub::with_capacity(4);
        let queue = hub.register_session("s1", "bob");
        hub.subscribe("s1", "sub1", all_filter()).unwrap();

        for _ in 0..20 {
            let (event, view) = message_event("alice");
            hub.publish(&event, &view);
            let n = queue.next().await.unwrap();
            assert_eq!(n.method, "subscription.event");
        }
        assert_eq!(hub.dropped_total(), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_match() {
        let hub = Arc::new(SubscriptionHub::new());

        let waiter_hub = hub.clone();
        let waiter = tokio::spawn(async move {
            waiter_hub
                .wait("bob", all_filter(), Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (event, view) = message_event("alice");
        hub.publish(&event, &view);

        match waiter.await.unwrap() {
            WaitOutcome::Match(value) => assert_eq!(value["id"], event.id.to_string()),
            WaitOutcome::TimedOut => panic!("expected a match"),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_with_sentinel() {
        let hub = SubscriptionHub::new();
        let started = std::time::Instant::now();
        let outcome = hub
            .wait("bob", all_filter(), Duration::from_millis(200))
            .await;
        let elapsed = started.elapsed();

        assert!(matches!(outcome, WaitOutcome::TimedOut));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_mention_wait_matches_audience() {
        let hub = Arc::new(SubscriptionHub::new());
        let compiled = CompiledFilter::Mention {
            targets: vec!["bob".to_string()],
        };

        let waiter_hub = hub.clone();
        let waiter =
            tokio::spawn(
                async move { waiter_hub.wait("bob", compiled, Duration::from_secs(5)).await },
            );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (event, view) = message_event("alice"); // audience contains bob
        hub.publish(&event, &view);

        assert!(matches!(waiter.await.unwrap(), WaitOutcome::Match(_)));
    }

    #[test]
    fn test_subscribe_requires_live_session() {
        let hub = SubscriptionHub::new();
        let err = hub.subscribe("ghost", "sub1", all_filter()).unwrap_err();
        assert_eq!(err.code(), -32002);
    }
}
