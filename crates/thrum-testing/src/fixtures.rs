use std::sync::Arc;

use anyhow::Result;
use thrum_runtime::{Daemon, RegisterParams, SendParams, SendReceipt};

/// Register an agent with sensible test defaults.
pub async fn register(daemon: &Arc<Daemon>, agent_id: &str, role: &str) -> Result<()> {
    daemon
        .register_agent(RegisterParams {
            agent_id: Some(agent_id.to_string()),
            role: Some(role.to_string()),
            module: Some("main".to_string()),
            ..Default::default()
        })
        .await?;
    Ok(())
}

/// Send a plain text message with no scopes beyond what the content
/// mentions.
pub async fn send_text(
    daemon: &Arc<Daemon>,
    author: &str,
    content: &str,
) -> Result<SendReceipt> {
    let receipt = daemon
        .message_send(
            author,
            SendParams {
                content: content.to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: None,
            },
        )
        .await?;
    Ok(receipt)
}
