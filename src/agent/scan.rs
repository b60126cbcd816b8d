//! Periodic dialog scan: unread messages, mentions, marked-unread flags,
//! and reactions on agent messages.

use super::{Agent, AgentDeps, agent_responsiveness};
use crate::MessageId;
use crate::chat::{ChatTransport, DialogInfo, ServiceKind};
use crate::config::TELEGRAM_SYSTEM_USER_ID;
use crate::error::Result;
use crate::schedule::{extend_schedule, needs_extension};
use crate::tasks::{ReceivedInsert, insert_received_task};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many recent messages are checked for unblocked mentions.
const MENTION_PROBE_LIMIT: usize = 5;

/// How many recent messages are searched for a reacted-to agent message.
const REACTION_PROBE_LIMIT: usize = 20;

/// Sweep all dialogs once, coalescing anything actionable into `received`
/// tasks, then refresh the sticker/media caches and top up the schedule.
pub async fn scan_unread_messages(agent: &Arc<Agent>, deps: &AgentDeps) -> Result<()> {
    if agent.is_disabled() {
        return Ok(());
    }
    // Asleep agents do not read anything; skipping also avoids marking
    // conversations as read.
    if agent_responsiveness(agent, deps).await <= 0.0 {
        debug!(agent = %agent.name(), "skipping unread scan: responsiveness is zero");
        return Ok(());
    }
    let Some(transport) = agent.transport() else {
        return Ok(());
    };
    if !transport.is_connected() {
        return Ok(());
    }
    let Some(agent_id) = agent.agent_id() else {
        return Ok(());
    };

    let dialogs = transport.dialogs().await?;
    for dialog in &dialogs {
        if dialog.id == TELEGRAM_SYSTEM_USER_ID {
            continue;
        }

        let muted = agent.is_muted(dialog.id).await;
        if deps.storage.is_gagged(agent_id, dialog.id).await? {
            debug!(agent = %agent.name(), channel = dialog.id, "gagged; skipping in scan");
            continue;
        }

        let has_unread = !muted && dialog.unread_count > 0;
        let has_mentions = dialog.unread_mentions_count > 0;
        let is_marked_unread = dialog.unread_mark;

        let mut is_callout = false;
        if has_mentions {
            is_callout =
                has_unblocked_mention(agent, transport.as_ref(), dialog, deps).await;
        }

        let reaction_message_id = if dialog.unread_reactions_count > 0 {
            find_reacted_agent_message(transport.as_ref(), dialog).await
        } else {
            None
        };
        let has_reactions = reaction_message_id.is_some();

        if !(is_callout || has_unread || is_marked_unread || has_reactions) {
            continue;
        }

        // A lone "contact joined" service notification is read and
        // forgotten, never planned for.
        if has_unread && !is_callout && !is_marked_unread && !has_reactions {
            if is_contact_signup_only(transport.as_ref(), dialog).await {
                info!(agent = %agent.name(), channel = dialog.id, "sign-up notification; marking read");
                if let Err(error) = transport
                    .send_read_acknowledge(dialog.id, has_mentions, false)
                    .await
                {
                    debug!(agent = %agent.name(), %error, "read acknowledge failed");
                }
                continue;
            }
        }

        let entity = agent.entity(dialog.id).await;
        if let Some(entity) = entity.as_ref() {
            if entity.is_group_or_channel() && !entity.can_send_messages {
                debug!(agent = %agent.name(), channel = dialog.id, "cannot send here; skipping");
                continue;
            }
        }

        info!(
            agent = %agent.name(),
            channel = dialog.id,
            unread = dialog.unread_count,
            mentions = dialog.unread_mentions_count,
            marked = is_marked_unread,
            reactions = has_reactions,
            "found unread content"
        );

        let mut insert = ReceivedInsert::new(agent_id, dialog.id);
        insert.agent_name = Some(agent.name().to_string());
        insert.channel_name = Some(dialog.title.clone());
        insert.is_group_chat = dialog.kind.is_group_or_channel();
        insert.is_callout = is_callout || is_marked_unread;
        insert.reaction_message_id = reaction_message_id;
        insert.clear_mentions = has_mentions;
        insert.clear_reactions = has_reactions;
        {
            let mut queue = deps.queue.lock().expect("work queue poisoned");
            insert_received_task(&mut queue, insert);
        }
        deps.persist_queue();
    }

    agent.refresh_sticker_cache().await;
    agent.refresh_saved_media().await;
    maybe_extend_schedule(agent, deps).await;
    Ok(())
}

/// Mentions only count as callouts when an unblocked user made them.
async fn has_unblocked_mention(
    agent: &Agent,
    transport: &dyn ChatTransport,
    dialog: &DialogInfo,
    deps: &AgentDeps,
) -> bool {
    let messages = match transport.recent_messages(dialog.id, MENTION_PROBE_LIMIT).await {
        Ok(messages) => messages,
        Err(error) => {
            debug!(agent = %agent.name(), %error, "mention probe failed");
            return false;
        }
    };
    let now = deps.clock.now();
    for message in messages {
        if !message.mentioned {
            continue;
        }
        match message.sender_id {
            Some(sender) if agent.is_blocked(sender, now).await => continue,
            _ => return true,
        }
    }
    false
}

/// Reactions only trigger a turn when they landed on an agent message.
async fn find_reacted_agent_message(
    transport: &dyn ChatTransport,
    dialog: &DialogInfo,
) -> Option<MessageId> {
    let messages = transport
        .recent_messages(dialog.id, REACTION_PROBE_LIMIT)
        .await
        .ok()?;
    messages
        .iter()
        .find(|m| m.outgoing && m.has_unread_reactions)
        .map(|m| m.id)
}

/// True when the newest unread message is a contact sign-up service
/// notification and it is the only message in the conversation.
async fn is_contact_signup_only(transport: &dyn ChatTransport, dialog: &DialogInfo) -> bool {
    let messages = match transport.recent_messages(dialog.id, 2).await {
        Ok(messages) => messages,
        Err(_) => return false,
    };
    messages.len() == 1 && messages[0].service == Some(ServiceKind::ContactSignUp)
}

/// Extend the daily schedule when it runs below the threshold.
async fn maybe_extend_schedule(agent: &Arc<Agent>, deps: &AgentDeps) {
    let Some(description) = agent.definition.daily_schedule_description.clone() else {
        return;
    };
    let Some(agent_id) = agent.agent_id() else {
        return;
    };
    let now = deps.clock.now();
    let mut schedule = match deps.storage.load_schedule(agent_id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => crate::schedule::Schedule::new(agent.definition.timezone().name()),
        Err(error) => {
            warn!(agent = %agent.name(), %error, "failed to load schedule");
            return;
        }
    };
    if !needs_extension(&schedule, now) {
        return;
    }
    match extend_schedule(
        &mut schedule,
        agent.llm.as_ref(),
        deps.prompts.as_ref(),
        agent.name(),
        &description,
        &agent.definition.instructions,
        now,
    )
    .await
    {
        Ok(_) => {
            if let Err(error) = deps.storage.save_schedule(agent_id, &schedule, now).await {
                warn!(agent = %agent.name(), %error, "failed to save schedule");
            }
        }
        Err(error) => warn!(agent = %agent.name(), %error, "schedule extension failed"),
    }
}
