//! `xsend`: trigger a planning turn on another conversation of the same
//! agent.

use super::registry::HandlerCtx;
use crate::chat::peer_id_from_value;
use crate::error::Result;
use crate::tasks::{ReceivedInsert, TaskNode, insert_received_task};
use tracing::{info, warn};

/// Cross-channel send. Gag state of the target conversation is
/// deliberately ignored: the agent may still talk to itself across
/// channels even where automatic reception is muted.
pub async fn handle(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let Some(raw_target) = task.params.get("target_channel_id") else {
        warn!(agent = %ctx.agent.name(), "xsend missing target_channel_id");
        return Ok(());
    };
    let Some(target) = peer_id_from_value(raw_target) else {
        warn!(agent = %ctx.agent.name(), ?raw_target, "xsend target is not a peer id");
        return Ok(());
    };
    if target == ctx.channel_id {
        info!(agent = %ctx.agent.name(), "xsend target equals current channel; ignoring");
        return Ok(());
    }

    let intent = task.param_str("intent").map(str::trim).unwrap_or("").to_string();

    let mut insert = ReceivedInsert::new(ctx.agent_id, target);
    insert.agent_name = Some(ctx.agent.name().to_string());
    insert.xsend_intent = Some(intent.clone());
    if let Some(entity) = ctx.agent.entity(target).await {
        insert.channel_name = Some(entity.display_name());
        insert.is_group_chat = entity.is_group_or_channel();
    }

    {
        let mut queue = ctx.deps.queue.lock().expect("work queue poisoned");
        insert_received_task(&mut queue, insert);
    }
    ctx.deps.persist_queue();
    info!(
        agent = %ctx.agent.name(),
        from = ctx.channel_id,
        to = target,
        intent_len = intent.len(),
        "scheduled cross-channel turn"
    );
    Ok(())
}
