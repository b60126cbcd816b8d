//! `send_media`: send a photo/video/audio/document cached from Saved
//! Messages.

use super::registry::HandlerCtx;
use crate::chat::ChatTransport as _;
use crate::error::{Result, TaskError};
use crate::tasks::TaskNode;
use tracing::info;

pub async fn handle(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let Some(unique_id) = task
        .param_str("unique_id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return Err(TaskError::Permanent("send_media task missing 'unique_id'".into()).into());
    };

    let Some(item) = ctx.agent.saved_media_item(unique_id) else {
        // The model referenced media the agent no longer has; nothing to
        // send and retrying will not bring it back.
        return Err(TaskError::Permanent(format!("no cached media for '{unique_id}'")).into());
    };
    let Some(file_ref) = item.file_ref.as_ref() else {
        return Err(TaskError::Permanent(format!("media '{unique_id}' has no file reference")).into());
    };

    let transport = ctx
        .agent
        .transport()
        .ok_or_else(|| TaskError::Transient("transport not connected".into()))?;

    info!(
        agent = %ctx.agent.name(),
        channel = ctx.channel_id,
        unique_id,
        kind = %item.kind,
        "sending media"
    );
    transport
        .send_file(ctx.channel_id, file_ref, item.kind, task.param_i64("in_reply_to"))
        .await?;
    Ok(())
}
