//! Kind → handler dispatch.
//!
//! Deferred handlers run from the tick loop; immediate handlers (think,
//! remember, schedule) have no chat I/O and run inline during the
//! planning turn.

use crate::agent::{Agent, AgentDeps};
use crate::error::Result;
use crate::tasks::TaskNode;
use crate::{AgentId, ChannelId};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a handler can reach: the agent, the shared services, and
/// the graph coordinates of the task being run.
pub struct HandlerCtx {
    pub agent: Arc<Agent>,
    pub deps: AgentDeps,
    pub graph_id: String,
    pub agent_id: AgentId,
    pub channel_id: ChannelId,
    pub is_group_chat: bool,
}

type HandlerFn = for<'a> fn(&'a HandlerCtx, &'a TaskNode) -> BoxFuture<'a, Result<()>>;

/// Fixed table of handlers, split into deferred and immediate kinds.
pub struct HandlerRegistry {
    deferred: HashMap<&'static str, HandlerFn>,
    immediate: HashMap<&'static str, HandlerFn>,
}

impl HandlerRegistry {
    /// The standard kind set.
    pub fn standard() -> Self {
        let mut deferred: HashMap<&'static str, HandlerFn> = HashMap::new();
        deferred.insert("received", |ctx, task| {
            Box::pin(super::received::handle(ctx, task))
        });
        deferred.insert("send", |ctx, task| Box::pin(super::send::handle(ctx, task)));
        deferred.insert("sticker", |ctx, task| {
            Box::pin(super::sticker::handle(ctx, task))
        });
        deferred.insert("send_media", |ctx, task| {
            Box::pin(super::media::handle(ctx, task))
        });
        deferred.insert("block", |ctx, task| {
            Box::pin(super::block::handle_block(ctx, task))
        });
        deferred.insert("unblock", |ctx, task| {
            Box::pin(super::block::handle_unblock(ctx, task))
        });
        deferred.insert("wait", |ctx, task| Box::pin(super::wait::handle(ctx, task)));
        deferred.insert("xsend", |ctx, task| Box::pin(super::xsend::handle(ctx, task)));
        deferred.insert("clear-conversation", |ctx, task| {
            Box::pin(super::clear::handle(ctx, task))
        });

        let mut immediate: HashMap<&'static str, HandlerFn> = HashMap::new();
        immediate.insert("think", |ctx, task| {
            Box::pin(super::memory::handle_think(ctx, task))
        });
        immediate.insert("remember", |ctx, task| {
            Box::pin(super::memory::handle_remember(ctx, task))
        });
        immediate.insert("schedule", |ctx, task| {
            Box::pin(super::schedule::handle(ctx, task))
        });

        Self { deferred, immediate }
    }

    /// Kinds whose handlers run inline during the planning turn.
    pub fn is_immediate(&self, kind: &str) -> bool {
        self.immediate.contains_key(kind)
    }

    /// Every kind the model is allowed to emit.
    pub fn allowed_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .deferred
            .keys()
            .chain(self.immediate.keys())
            .filter(|kind| **kind != "received")
            .map(|kind| kind.to_string())
            .collect();
        kinds.push("retrieve".to_string());
        kinds.sort();
        kinds
    }

    /// Run a deferred (or immediate) task. Unknown kinds are a permanent
    /// failure.
    pub async fn dispatch(&self, ctx: &HandlerCtx, task: &TaskNode) -> Result<()> {
        let handler = self
            .deferred
            .get(task.kind.as_str())
            .or_else(|| self.immediate.get(task.kind.as_str()))
            .ok_or_else(|| {
                crate::error::TaskError::Permanent(format!("unknown task kind: {}", task.kind))
            })?;
        handler(ctx, task).await
    }

    /// Run an immediate task if the kind qualifies; returns whether it was
    /// handled.
    pub async fn dispatch_immediate(&self, ctx: &HandlerCtx, task: &TaskNode) -> Result<bool> {
        match self.immediate.get(task.kind.as_str()) {
            Some(handler) => {
                handler(ctx, task).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
