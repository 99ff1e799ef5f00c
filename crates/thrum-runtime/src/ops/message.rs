use serde::{Deserialize, Serialize};
use thrum_engine::{Router, SendRequest};
use thrum_index::{MessageQuery, MessageRecord, queries};
use thrum_types::event::{MessageDeletePayload, MessageEditPayload, MessageReadPayload};
use thrum_types::{Error, EventKind, MessageBody, Ref, Result, Scope};
use ulid::Ulid;

use crate::daemon::{Daemon, DbDirectory};

#[derive(Debug, Clone, Deserialize)]
pub struct SendParams {
    pub content: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub refs: Vec<Ref>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub thread_id: String,
}

impl Daemon {
    /// message.send: validate and stamp the envelope, then append,
    /// project, and fan out.
    pub async fn message_send(&self, author: &str, params: SendParams) -> Result<SendReceipt> {
        let reply_to = params
            .reply_to
            .as_deref()
            .map(|raw| {
                raw.parse::<Ulid>()
                    .map_err(|_| Error::Validation(format!("invalid reply_to id {}", raw)))
            })
            .transpose()?;

        let request = SendRequest {
            body: MessageBody {
                format: params.format.unwrap_or_else(|| "text".to_string()),
                content: params.content,
            },
            scopes: params.scopes,
            refs: params.refs,
            reply_to,
        };

        let message_id = self.next_id();
        let payload = {
            let db = self.db().lock().expect("projection mutex poisoned");
            let directory = DbDirectory(&db);
            Router::new(&directory).build(message_id, author, request)?
        };

        let event =
            self.new_event_with_id(message_id, EventKind::MessageCreate, author, &payload)?;
        self.append_and_project(&event).await?;

        Ok(SendReceipt {
            message_id: message_id.to_string(),
            thread_id: payload.thread_id.to_string(),
        })
    }

    /// message.edit: body only; scopes and refs are immutable.
    pub async fn message_edit(
        &self,
        author: &str,
        message_id: &str,
        body: MessageBody,
    ) -> Result<()> {
        let record = self.require_message(message_id)?;
        if record.deleted {
            return Err(Error::State(format!(
                "message {} is deleted; edits are not allowed",
                message_id
            )));
        }

        let id = parse_message_id(message_id)?;
        let event = self.new_event(
            EventKind::MessageEdit,
            author,
            &MessageEditPayload {
                message_id: id,
                body,
            },
        )?;
        self.append_and_project(&event).await
    }

    /// message.delete: soft delete; the log entry remains, the
    /// projection flags the row. Deleted is terminal.
    pub async fn message_delete(&self, author: &str, message_id: &str) -> Result<()> {
        let record = self.require_message(message_id)?;
        if record.deleted {
            return Err(Error::State(format!("message {} is already deleted", message_id)));
        }

        let id = parse_message_id(message_id)?;
        let event = self.new_event(
            EventKind::MessageDelete,
            author,
            &MessageDeletePayload { message_id: id },
        )?;
        self.append_and_project(&event).await
    }

    pub fn message_list(&self, query: &MessageQuery) -> Result<Vec<MessageRecord>> {
        let db = self.db().lock().expect("projection mutex poisoned");
        queries::message::list(&db, query).map_err(Error::from)
    }

    pub fn message_get(&self, message_id: &str) -> Result<MessageRecord> {
        self.require_message(message_id)
    }

    /// message.mark_read: read state is private per machine, so this
    /// lands in the local-only shard.
    pub async fn message_mark_read(&self, agent_id: &str, message_id: &str) -> Result<()> {
        self.require_message(message_id)?;
        let id = parse_message_id(message_id)?;
        let event = self.new_event(
            EventKind::MessageRead,
            agent_id,
            &MessageReadPayload { message_id: id },
        )?;
        self.append_and_project(&event).await
    }

    fn require_message(&self, message_id: &str) -> Result<MessageRecord> {
        let db = self.db().lock().expect("projection mutex poisoned");
        queries::message::get(&db, message_id)
            .map_err(Error::from)?
            .ok_or_else(|| Error::NotFound(format!("message {}", message_id)))
    }
}

fn parse_message_id(raw: &str) -> Result<Ulid> {
    raw.parse()
        .map_err(|_| Error::Validation(format!("invalid message id {}", raw)))
}
