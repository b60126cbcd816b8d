//! `clear-conversation`: wipe a direct-message history for both sides.

use super::registry::HandlerCtx;
use crate::chat::ChatTransport as _;
use crate::error::{Result, TaskError};
use crate::tasks::TaskNode;
use tracing::{info, warn};

pub async fn handle(ctx: &HandlerCtx, _task: &TaskNode) -> Result<()> {
    if ctx.is_group_chat {
        warn!(
            agent = %ctx.agent.name(),
            channel = ctx.channel_id,
            "clear-conversation only applies to direct messages"
        );
        return Ok(());
    }
    let transport = ctx
        .agent
        .transport()
        .ok_or_else(|| TaskError::Transient("transport not connected".into()))?;

    info!(agent = %ctx.agent.name(), channel = ctx.channel_id, "clearing conversation");
    transport.delete_history(ctx.channel_id, true).await?;
    Ok(())
}
