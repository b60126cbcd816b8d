//! `send`: deliver a text message.

use super::registry::HandlerCtx;
use crate::chat::ChatTransport as _;
use crate::error::{Result, TaskError};
use crate::tasks::TaskNode;
use tracing::info;

pub async fn handle(ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
    let message = task
        .param_str("message")
        .or_else(|| task.param_str("text"))
        .map(str::trim)
        .unwrap_or("");
    // An empty message is a no-op, not an error.
    if message.is_empty() {
        return Ok(());
    }

    let transport = ctx
        .agent
        .transport()
        .ok_or_else(|| TaskError::Transient("transport not connected".into()))?;
    let reply_to = task.param_i64("in_reply_to");

    info!(
        agent = %ctx.agent.name(),
        channel = ctx.channel_id,
        reply_to,
        "sending message"
    );
    transport
        .send_message(ctx.channel_id, message, reply_to, true)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::TransportCall;
    use crate::handlers::testing::ctx_fixture;
    use crate::tasks::graph::Params;
    use serde_json::Value;

    #[tokio::test]
    async fn sends_markdown_message_with_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, transport) = ctx_fixture(dir.path()).await;

        let mut params = Params::new();
        params.insert("message".into(), Value::from("hello back"));
        params.insert("in_reply_to".into(), Value::from(42));
        let task = TaskNode::new("send", params);

        handle(&ctx, &task).await.unwrap();
        assert_eq!(
            transport.calls(),
            vec![TransportCall::SendMessage {
                peer: 2,
                text: "hello back".into(),
                reply_to: Some(42),
                markdown: true,
            }]
        );
    }

    #[tokio::test]
    async fn empty_message_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, transport) = ctx_fixture(dir.path()).await;
        let task = TaskNode::new("send", Params::new());
        handle(&ctx, &task).await.unwrap();
        assert!(transport.calls().is_empty());
    }
}
