use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thrum_index::MessageQuery;
use thrum_runtime::{Daemon, RegisterParams, SendParams, SessionStartParams, WaitOutcome};
use thrum_types::{
    Error, FilterType, MemberType, MessageBody, SubscriptionFilter,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use ulid::Ulid;

use crate::protocol::notification_frame;

/// Per-connection identity, bound by the first agent.register.
#[derive(Default)]
pub(crate) struct ConnState {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub detached: bool,
}

pub(crate) enum MethodError {
    /// -32601
    UnknownMethod(String),
    /// -32602
    InvalidParams(String),
    /// Application error with its taxonomy code
    App(Error),
}

impl MethodError {
    pub fn code(&self) -> i32 {
        match self {
            MethodError::UnknownMethod(_) => -32601,
            MethodError::InvalidParams(_) => -32602,
            MethodError::App(err) => err.code(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            MethodError::UnknownMethod(method) => format!("Method not found: {}", method),
            MethodError::InvalidParams(detail) => format!("Invalid params: {}", detail),
            MethodError::App(err) => err.to_string(),
        }
    }
}

impl From<Error> for MethodError {
    fn from(err: Error) -> Self {
        MethodError::App(err)
    }
}

type MethodResult = std::result::Result<Value, MethodError>;

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, MethodError> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|err| MethodError::InvalidParams(err.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> MethodResult {
    serde_json::to_value(value).map_err(|err| MethodError::App(Error::Internal(err.to_string())))
}

fn bound_agent(conn: &ConnState) -> Result<String, MethodError> {
    conn.agent_id
        .clone()
        .ok_or_else(|| MethodError::App(Error::Auth("no agent bound; call agent.register first".to_string())))
}

fn bound_session(conn: &ConnState) -> Result<String, MethodError> {
    conn.session_id
        .clone()
        .ok_or_else(|| MethodError::App(Error::Auth("no session bound".to_string())))
}

#[derive(Deserialize)]
struct HeartbeatParams {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct SessionEndParams {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct SetIntentParams {
    intent: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct EditParams {
    message_id: String,
    content: String,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Deserialize)]
struct MessageIdParams {
    message_id: String,
}

#[derive(Deserialize)]
struct GroupCreateParams {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct GroupMemberParams {
    name: String,
    member_type: MemberType,
    member_value: String,
}

#[derive(Deserialize)]
struct GroupNameParams {
    name: String,
}

#[derive(Deserialize)]
struct SubscribeParams {
    filter_type: FilterType,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    include_self: bool,
}

#[derive(Deserialize)]
struct SubscribeDeleteParams {
    subscription_id: String,
}

#[derive(Deserialize)]
struct WaitParams {
    #[serde(default)]
    filter_type: Option<FilterType>,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    include_self: bool,
    #[serde(default)]
    timeout_ms: Option<u64>,
    /// Replay the log after this event id before blocking
    #[serde(default)]
    since: Option<String>,
}

#[derive(Deserialize)]
struct ContextSaveParams {
    content: String,
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Deserialize)]
struct ContextGetParams {
    #[serde(default)]
    agent_id: Option<String>,
}

/// Bind a fresh session on this connection: close the previous hub
/// queue, register the new one, and pump its notifications to the
/// writer.
fn bind_session(
    daemon: &Arc<Daemon>,
    conn: &mut ConnState,
    outgoing: &UnboundedSender<String>,
    session_id: &str,
    agent_id: &str,
    detached: bool,
) {
    if let Some(old) = conn.session_id.take() {
        daemon.hub().close_session(&old);
    }
    let queue = daemon.hub().register_session(session_id, agent_id);
    conn.session_id = Some(session_id.to_string());
    conn.detached = detached;

    let outgoing = outgoing.clone();
    tokio::spawn(async move {
        while let Some(notification) = queue.next().await {
            let frame = notification_frame(&notification.method, &notification.params);
            if outgoing.send(frame).is_err() {
                break;
            }
        }
    });
}

/// End-of-connection cleanup: non-detached sessions end, detached ones
/// stay open for a later reconnect.
pub(crate) async fn on_disconnect(daemon: &Arc<Daemon>, conn: &mut ConnState) {
    let Some(session_id) = conn.session_id.take() else {
        return;
    };
    daemon.hub().close_session(&session_id);
    if conn.detached {
        return;
    }
    if let Some(agent_id) = &conn.agent_id
        && let Err(err) = daemon.session_end(agent_id, Some(&session_id)).await
    {
        debug!(%err, %session_id, "session.end on disconnect failed");
    }
}

pub(crate) async fn dispatch(
    daemon: &Arc<Daemon>,
    conn: &mut ConnState,
    outgoing: &UnboundedSender<String>,
    method: &str,
    params: Option<Value>,
) -> MethodResult {
    match method {
        "agent.register" => {
            if conn.agent_id.is_some() {
                return Err(MethodError::App(Error::Conflict(
                    "connection is already bound to an agent".to_string(),
                )));
            }
            let params: RegisterParams = parse_params(params)?;
            let agent = daemon.register_agent(params).await?;
            conn.agent_id = Some(agent.agent_id.clone());

            // Binding a connection opens an ephemeral session.
            let session = daemon
                .session_start(&agent.agent_id, SessionStartParams::default())
                .await?;
            bind_session(daemon, conn, outgoing, &session.session_id, &agent.agent_id, false);
            to_value(json!({"agent": agent, "session_id": session.session_id}))
        }
        "agent.heartbeat" => {
            let agent_id = bound_agent(conn)?;
            let params: HeartbeatParams = parse_params(params)?;
            let session_id = match params.session_id {
                Some(id) => id,
                None => bound_session(conn)?,
            };
            daemon.heartbeat(&agent_id, &session_id).await?;
            to_value(json!({"ok": true}))
        }
        "agent.list" => to_value(json!({"agents": daemon.agent_list()?})),
        "session.start" => {
            let agent_id = bound_agent(conn)?;
            let params: SessionStartParams = parse_params(params)?;
            let detached = params.detached;
            let session = daemon.session_start(&agent_id, params).await?;
            bind_session(daemon, conn, outgoing, &session.session_id, &agent_id, detached);
            to_value(session)
        }
        "session.end" => {
            let agent_id = bound_agent(conn)?;
            let params: SessionEndParams = parse_params(params)?;
            let session_id = match params.session_id {
                Some(id) => id,
                None => bound_session(conn)?,
            };
            daemon.session_end(&agent_id, Some(&session_id)).await?;
            if conn.session_id.as_deref() == Some(session_id.as_str()) {
                daemon.hub().close_session(&session_id);
                conn.session_id = None;
            }
            to_value(json!({"ok": true}))
        }
        "session.set_intent" => {
            let agent_id = bound_agent(conn)?;
            let params: SetIntentParams = parse_params(params)?;
            let session_id = match params.session_id {
                Some(id) => id,
                None => bound_session(conn)?,
            };
            daemon
                .session_set_intent(&agent_id, &session_id, params.intent)
                .await?;
            to_value(json!({"ok": true}))
        }
        "message.send" => {
            let agent_id = bound_agent(conn)?;
            let params: SendParams = parse_params(params)?;
            to_value(daemon.message_send(&agent_id, params).await?)
        }
        "message.edit" => {
            let agent_id = bound_agent(conn)?;
            let params: EditParams = parse_params(params)?;
            let body = MessageBody {
                format: params.format.unwrap_or_else(|| "text".to_string()),
                content: params.content,
            };
            daemon.message_edit(&agent_id, &params.message_id, body).await?;
            to_value(json!({"ok": true}))
        }
        "message.delete" => {
            let agent_id = bound_agent(conn)?;
            let params: MessageIdParams = parse_params(params)?;
            daemon.message_delete(&agent_id, &params.message_id).await?;
            to_value(json!({"ok": true}))
        }
        "message.list" => {
            let query: MessageQuery = parse_params(params)?;
            to_value(json!({"messages": daemon.message_list(&query)?}))
        }
        "message.mark_read" => {
            let agent_id = bound_agent(conn)?;
            let params: MessageIdParams = parse_params(params)?;
            daemon.message_mark_read(&agent_id, &params.message_id).await?;
            to_value(json!({"ok": true}))
        }
        "group.create" => {
            let agent_id = bound_agent(conn)?;
            let params: GroupCreateParams = parse_params(params)?;
            to_value(
                daemon
                    .group_create(&agent_id, &params.name, &params.description)
                    .await?,
            )
        }
        "group.add_member" => {
            let agent_id = bound_agent(conn)?;
            let params: GroupMemberParams = parse_params(params)?;
            daemon
                .group_add_member(
                    &agent_id,
                    &params.name,
                    thrum_types::GroupMember {
                        member_type: params.member_type,
                        member_value: params.member_value,
                    },
                )
                .await?;
            to_value(json!({"ok": true}))
        }
        "group.remove_member" => {
            let agent_id = bound_agent(conn)?;
            let params: GroupMemberParams = parse_params(params)?;
            daemon
                .group_remove_member(
                    &agent_id,
                    &params.name,
                    thrum_types::GroupMember {
                        member_type: params.member_type,
                        member_value: params.member_value,
                    },
                )
                .await?;
            to_value(json!({"ok": true}))
        }
        "group.expand" => {
            let params: GroupNameParams = parse_params(params)?;
            to_value(json!({"agents": daemon.group_expand(&params.name)?}))
        }
        "group.list" => to_value(json!({"groups": daemon.group_list()?})),
        "team.list" => to_value(json!({"members": daemon.team_list()?})),
        "subscribe.create" => {
            let agent_id = bound_agent(conn)?;
            let session_id = bound_session(conn)?;
            let params: SubscribeParams = parse_params(params)?;
            let subscription_id = daemon
                .subscribe_create(
                    &session_id,
                    &agent_id,
                    SubscriptionFilter {
                        filter_type: params.filter_type,
                        selector: params.selector,
                        include_self: params.include_self,
                    },
                )
                .await?;
            to_value(json!({"subscription_id": subscription_id}))
        }
        "subscribe.delete" => {
            let agent_id = bound_agent(conn)?;
            let session_id = bound_session(conn)?;
            let params: SubscribeDeleteParams = parse_params(params)?;
            daemon
                .subscribe_delete(&session_id, &agent_id, &params.subscription_id)
                .await?;
            to_value(json!({"ok": true}))
        }
        "wait" => {
            let agent_id = bound_agent(conn)?;
            let params: WaitParams = parse_params(params)?;
            let since = params
                .since
                .as_deref()
                .map(|raw| {
                    raw.parse::<Ulid>()
                        .map_err(|_| MethodError::InvalidParams(format!("bad since id {}", raw)))
                })
                .transpose()?;
            let filter = SubscriptionFilter {
                filter_type: params.filter_type.unwrap_or(FilterType::All),
                selector: params.selector,
                include_self: params.include_self,
            };
            let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(30_000));

            match daemon.wait(&agent_id, filter, timeout, since).await? {
                WaitOutcome::Match(event) => to_value(json!({"event": event})),
                WaitOutcome::TimedOut => to_value(json!({"timed_out": true})),
            }
        }
        "context.save" => {
            let params: ContextSaveParams = parse_params(params)?;
            let agent_id = match params.agent_id {
                Some(id) => id,
                None => bound_agent(conn)?,
            };
            daemon.context_save(&agent_id, &params.content)?;
            to_value(json!({"ok": true}))
        }
        "context.get" => {
            let params: ContextGetParams = parse_params(params)?;
            let agent_id = match params.agent_id {
                Some(id) => id,
                None => bound_agent(conn)?,
            };
            to_value(json!({"content": daemon.context_get(&agent_id)?}))
        }
        "health.get" => to_value(daemon.health()?),
        other => Err(MethodError::UnknownMethod(other.to_string())),
    }
}
