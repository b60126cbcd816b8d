//! `think` / `remember`: storage-only immediate tasks.
//!
//! Both leave a "telepathic" trail: a self-addressed event row the agent
//! can see in its own context, never sent over the transport.

use super::registry::HandlerCtx;
use crate::error::{Result, TaskError};
use crate::storage::EntryTable;
use crate::tasks::TaskNode;
use tracing::info;

/// Record the agent's private reasoning for this conversation.
pub async fn handle_think(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let content = task
        .param_str("content")
        .or_else(|| task.param_str("message"))
        .map(str::trim)
        .unwrap_or("");
    if content.is_empty() {
        return Ok(());
    }
    let now = ctx.deps.clock.now();
    info!(agent = %ctx.agent.name(), channel = ctx.channel_id, "telepathic: {content}");
    ctx.deps
        .storage
        .upsert_entry(
            EntryTable::Events,
            ctx.agent_id,
            Some(ctx.channel_id),
            &task.id,
            &format!("think: {content}"),
            now,
        )
        .await?;
    Ok(())
}

/// Upsert (or delete, on empty content) a memory entry.
///
/// `scope: "conversation"` writes a channel-scoped note; anything else is
/// an agent-global memory. `created` is preserved when updating.
pub async fn handle_remember(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let entry_id = task.id.as_str();
    if entry_id.is_empty() {
        return Err(TaskError::Permanent("remember task has no id".into()).into());
    }

    let conversation_scoped = task
        .param_str("scope")
        .map(|scope| scope.eq_ignore_ascii_case("conversation"))
        .unwrap_or(false);
    let (table, channel) = if conversation_scoped {
        (EntryTable::Notes, Some(ctx.channel_id))
    } else {
        (EntryTable::Memories, None)
    };

    let content = task.param_str("content").map(str::trim).unwrap_or("");
    let now = ctx.deps.clock.now();
    let storage = &ctx.deps.storage;

    if content.is_empty() {
        let removed = storage.remove_entry(table, ctx.agent_id, channel, entry_id).await?;
        info!(
            agent = %ctx.agent.name(),
            channel = ctx.channel_id,
            entry = entry_id,
            removed,
            "forgot memory entry"
        );
    } else {
        storage
            .upsert_entry(table, ctx.agent_id, channel, entry_id, content, now)
            .await?;
        info!(
            agent = %ctx.agent.name(),
            channel = ctx.channel_id,
            entry = entry_id,
            "telepathic: remembered"
        );
        storage
            .upsert_entry(
                EntryTable::Events,
                ctx.agent_id,
                Some(ctx.channel_id),
                &format!("event-{entry_id}"),
                &format!("remember: {content}"),
                now,
            )
            .await?;
    }
    Ok(())
}
