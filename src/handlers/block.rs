//! `block` / `unblock`: blocklist management with a group-chat safety
//! check.

use super::registry::HandlerCtx;
use crate::chat::ChatTransport as _;
use crate::error::{ChatError, Result, TaskError};
use crate::tasks::TaskNode;
use tracing::{info, warn};

pub async fn handle_block(ctx: &HandlerCtx, _task: &TaskNode) -> Result<()> {
    let transport = ctx
        .agent
        .transport()
        .ok_or_else(|| TaskError::Transient("transport not connected".into()))?;

    // Only people can be blocked. The entity cache keeps this from
    // hammering the contacts API.
    match ctx.agent.entity(ctx.channel_id).await {
        Some(entity) if entity.is_group_or_channel() => {
            warn!(
                agent = %ctx.agent.name(),
                channel = ctx.channel_id,
                "refusing to block a group or channel"
            );
            return Ok(());
        }
        Some(_) => {}
        None => {
            return Err(TaskError::Permanent(format!(
                "cannot resolve entity {} to block",
                ctx.channel_id
            ))
            .into());
        }
    }

    info!(agent = %ctx.agent.name(), peer = ctx.channel_id, "blocking peer");
    match transport.block(ctx.channel_id).await {
        Ok(()) => Ok(()),
        Err(ChatError::EntityNotFound { id }) => {
            // Deleted account or inaccessible peer; retrying cannot help.
            Err(TaskError::Permanent(format!("cannot block unknown peer {id}")).into())
        }
        Err(error) => Err(error.into()),
    }
}

pub async fn handle_unblock(ctx: &HandlerCtx, _task: &TaskNode) -> Result<()> {
    let transport = ctx
        .agent
        .transport()
        .ok_or_else(|| TaskError::Transient("transport not connected".into()))?;

    if let Some(entity) = ctx.agent.entity(ctx.channel_id).await {
        if entity.is_group_or_channel() {
            warn!(
                agent = %ctx.agent.name(),
                channel = ctx.channel_id,
                "refusing to unblock a group or channel"
            );
            return Ok(());
        }
    }

    info!(agent = %ctx.agent.name(), peer = ctx.channel_id, "unblocking peer");
    transport.unblock(ctx.channel_id).await?;
    Ok(())
}
