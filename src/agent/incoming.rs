//! Push-delivered message handling.

use super::{Agent, AgentDeps};
use crate::chat::ChatMessage;
use crate::config::TELEGRAM_SYSTEM_USER_ID;
use crate::error::Result;
use crate::tasks::{ReceivedInsert, insert_received_task};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether a chat id addresses a direct message (the partner's user id).
pub fn is_direct_chat(chat_id: i64) -> bool {
    chat_id > 0
}

/// Handle one incoming message event: typing-state upkeep, block/mute/gag
/// gates, then coalesce into the conversation's `received` task.
pub async fn handle_incoming_message(
    agent: &Arc<Agent>,
    deps: &AgentDeps,
    message: ChatMessage,
) -> Result<()> {
    if message.chat_id == TELEGRAM_SYSTEM_USER_ID {
        debug!(agent = %agent.name(), "ignoring Telegram system message");
        return Ok(());
    }
    let Some(agent_id) = agent.agent_id() else {
        return Ok(());
    };
    let now = deps.clock.now();

    // The sender is typing only matters for DMs; groups bypass the gate.
    if let Some(sender_id) = message.sender_id {
        if is_direct_chat(message.chat_id) && sender_id != agent_id {
            deps.typing.mark_partner_typing(agent_id, message.chat_id, now);
        }
        if agent.is_blocked(sender_id, now).await {
            debug!(agent = %agent.name(), sender = sender_id, "dropping message from blocked sender");
            return Ok(());
        }
    }

    let is_callout = message.mentioned;
    let muted = agent.is_muted(message.chat_id).await;
    if deps.storage.is_gagged(agent_id, message.chat_id).await? {
        debug!(
            agent = %agent.name(),
            channel = message.chat_id,
            "conversation is gagged; not planning a turn"
        );
        return Ok(());
    }
    if muted && !is_callout {
        return Ok(());
    }

    // Skip rooms the agent cannot write to.
    let entity = agent.entity(message.chat_id).await;
    if let Some(entity) = entity.as_ref() {
        if entity.is_group_or_channel() && !entity.can_send_messages {
            debug!(
                agent = %agent.name(),
                channel = message.chat_id,
                "cannot send in this conversation; skipping"
            );
            return Ok(());
        }
    }

    let is_group = entity
        .as_ref()
        .map(|e| e.is_group_or_channel())
        .unwrap_or(!is_direct_chat(message.chat_id));

    info!(
        agent = %agent.name(),
        channel = message.chat_id,
        message_id = message.id,
        callout = is_callout,
        "inbound message"
    );

    let mut insert = ReceivedInsert::new(agent_id, message.chat_id);
    insert.agent_name = Some(agent.name().to_string());
    insert.channel_name = entity.as_ref().map(|e| e.display_name());
    insert.is_group_chat = is_group;
    insert.message_id = Some(message.id);
    insert.is_callout = is_callout;
    insert.clear_mentions = message.mentioned;

    {
        let mut queue = deps.queue.lock().expect("work queue poisoned");
        insert_received_task(&mut queue, insert);
    }
    deps.persist_queue();
    Ok(())
}
