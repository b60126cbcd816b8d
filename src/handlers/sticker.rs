//! `sticker`: send a sticker by set and name.

use super::registry::HandlerCtx;
use crate::chat::{ChatTransport as _, FileRef};
use crate::error::{Result, TaskError};
use crate::media::MediaKind;
use crate::tasks::TaskNode;
use tracing::{debug, info};

pub async fn handle(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let Some(name) = task.param_str("name").map(str::trim).filter(|n| !n.is_empty()) else {
        return Err(TaskError::Permanent("sticker task missing 'name'".into()).into());
    };
    let transport = ctx
        .agent
        .transport()
        .ok_or_else(|| TaskError::Transient("transport not connected".into()))?;

    let set_explicit = task.param_str("sticker_set").is_some();
    let set_name = task
        .param_str("sticker_set")
        .map(str::to_string)
        .or_else(|| ctx.agent.canonical_sticker_set().map(str::to_string));

    // 1) By-set cache.
    let mut file: Option<FileRef> = set_name
        .as_deref()
        .and_then(|set| ctx.agent.sticker_file(set, name))
        .map(|cached| cached.file_ref);

    // 2) Transient resolve within the requested set; no cache mutation.
    if file.is_none() {
        if let Some(set) = set_name.as_deref() {
            debug!(
                agent = %ctx.agent.name(),
                set,
                sticker = name,
                "sticker cache miss; resolving set"
            );
            match transport.sticker_set(set).await {
                Ok(resolved) => {
                    file = resolved
                        .stickers
                        .into_iter()
                        .find(|sticker| sticker.name == name)
                        .map(|sticker| sticker.file_ref);
                }
                Err(error) => {
                    debug!(agent = %ctx.agent.name(), set, %error, "sticker set resolve failed");
                }
            }
        }
    }

    // 3) Fall back to any cached set ONLY when the model did not pin one.
    if file.is_none() && !set_explicit {
        file = ctx
            .agent
            .catalog_stickers()
            .into_iter()
            .find(|sticker| sticker.name == name)
            .and_then(|sticker| {
                ctx.agent
                    .sticker_file(&sticker.set_name, &sticker.name)
                    .map(|cached| cached.file_ref)
            });
    }

    let reply_to = task.param_i64("in_reply_to");
    match file {
        Some(file) => {
            info!(agent = %ctx.agent.name(), channel = ctx.channel_id, sticker = name, "sending sticker");
            transport
                .send_file(ctx.channel_id, &file, MediaKind::Sticker, reply_to)
                .await?;
        }
        None => {
            // Unknown sticker: degrade to a plain-text echo of its name.
            info!(agent = %ctx.agent.name(), channel = ctx.channel_id, sticker = name, "sticker unknown; sending text");
            transport
                .send_message(ctx.channel_id, name, reply_to, false)
                .await?;
        }
    }
    Ok(())
}
