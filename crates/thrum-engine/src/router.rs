use thrum_types::event::MessageCreatePayload;
use thrum_types::{Error, MessageBody, Ref, RefType, Result, Scope};
use ulid::Ulid;

use crate::directory::Directory;
use crate::groups::GroupResolver;

/// Envelope caps. The JSON cap bounds what a single append (and a single
/// notification frame) can carry.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_envelope_bytes: usize,
    pub max_scope_type_len: usize,
    pub max_scope_value_len: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_envelope_bytes: 256 * 1024,
            max_scope_type_len: 64,
            max_scope_value_len: 256,
        }
    }
}

/// Raw send request as it arrives from the RPC surface.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub body: MessageBody,
    pub scopes: Vec<Scope>,
    pub refs: Vec<Ref>,
    pub reply_to: Option<Ulid>,
}

/// Validates and stamps outbound message envelopes.
pub struct Router<'a, D: Directory + ?Sized> {
    directory: &'a D,
    config: RouterConfig,
}

impl<'a, D: Directory + ?Sized> Router<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self::with_config(directory, RouterConfig::default())
    }

    pub fn with_config(directory: &'a D, config: RouterConfig) -> Self {
        Self { directory, config }
    }

    /// Build the message.create payload for `message_id`.
    ///
    /// Refs are normalized: `@x` mentions in the body and explicit
    /// agent/group refs are classified against the group directory; group
    /// refs expand into the audience, agent refs bind late (the literal
    /// id goes into the audience even when the agent is unknown).
    pub fn build(
        &self,
        message_id: Ulid,
        _author: &str,
        request: SendRequest,
    ) -> Result<MessageCreatePayload> {
        if request.body.content.trim().is_empty() {
            return Err(Error::Validation("message body is empty".to_string()));
        }
        for scope in &request.scopes {
            self.validate_scope(scope)?;
        }

        let resolver = GroupResolver::new(self.directory);
        let mut refs: Vec<Ref> = Vec::new();
        let mut audience: Vec<String> = Vec::new();
        let mut push_agent = |audience: &mut Vec<String>, agent: String| {
            if !audience.contains(&agent) {
                audience.push(agent);
            }
        };

        for reference in &request.refs {
            match reference.ref_type {
                RefType::Agent => push_agent(&mut audience, reference.value.clone()),
                RefType::Group => {
                    for agent in resolver.expand(&reference.value)? {
                        push_agent(&mut audience, agent);
                    }
                }
                RefType::File | RefType::Url => {}
            }
            if !refs.contains(reference) {
                refs.push(reference.clone());
            }
        }

        for mention in extract_mentions(&request.body.content) {
            let reference = if resolver.is_group(&mention)? {
                for agent in resolver.expand(&mention)? {
                    push_agent(&mut audience, agent);
                }
                Ref::group(mention)
            } else {
                push_agent(&mut audience, mention.clone());
                Ref::agent(mention)
            };
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }

        let thread_id = match request.reply_to {
            Some(parent_id) => match self.directory.thread_info(&parent_id)? {
                Some(info) if info.deleted => {
                    return Err(Error::State(format!(
                        "cannot reply to deleted message {}",
                        parent_id
                    )));
                }
                Some(info) => info.thread_id,
                // Parent not projected yet: this message roots its own
                // thread; the projector re-parents it when the parent
                // arrives through sync.
                None => message_id,
            },
            None => message_id,
        };

        let payload = MessageCreatePayload {
            body: request.body,
            scopes: request.scopes,
            refs,
            reply_to: request.reply_to,
            thread_id,
            audience,
        };

        let encoded = serde_json::to_vec(&payload)
            .map_err(|err| Error::Internal(format!("envelope encoding failed: {}", err)))?;
        if encoded.len() > self.config.max_envelope_bytes {
            return Err(Error::Validation(format!(
                "envelope is {} bytes, cap is {}",
                encoded.len(),
                self.config.max_envelope_bytes
            )));
        }

        Ok(payload)
    }

    fn validate_scope(&self, scope: &Scope) -> Result<()> {
        let printable = |s: &str| s.chars().all(|c| c.is_ascii() && !c.is_ascii_control());
        if scope.scope_type.is_empty() || scope.value.is_empty() {
            return Err(Error::Validation("scope type and value must be non-empty".to_string()));
        }
        if !printable(&scope.scope_type) || !printable(&scope.value) {
            return Err(Error::Validation(format!(
                "scope {}:{} contains non-printable or non-ASCII characters",
                scope.scope_type, scope.value
            )));
        }
        if scope.scope_type.len() > self.config.max_scope_type_len
            || scope.value.len() > self.config.max_scope_value_len
        {
            return Err(Error::Validation(format!(
                "scope {}:{} exceeds length caps",
                scope.scope_type, scope.value
            )));
        }
        Ok(())
    }
}

/// Pull `@name` mentions out of a message body. A mention starts at a
/// word boundary and runs over `[A-Za-z0-9._-]`; trailing dots are
/// treated as punctuation, not part of the name.
fn extract_mentions(content: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'@' {
            let boundary = i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'@');
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'.' | b'_' | b'-'))
            {
                end += 1;
            }
            if boundary && end > start {
                let name = content[start..end].trim_end_matches('.').to_string();
                if !name.is_empty() && !mentions.contains(&name) {
                    mentions.push(name);
                }
            }
            i = end;
        } else {
            i += 1;
        }
    }

    mentions
}
