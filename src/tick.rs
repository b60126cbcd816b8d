//! The tick loop: one bounded scheduling step at a fixed cadence.
//!
//! Each tick resets the media description budget, emits typing/online
//! indicators for pending waits, dispatches at most one ready task, and
//! persists the queue. Failures route through the graph retry machinery.

use crate::agent::AgentDeps;
use crate::chat::{ChatTransport as _, TypingAction};
use crate::config::{MAX_RETRIES, RETRY_WAIT_SECS, TASK_LOG_RETENTION_DAYS, TICK_INTERVAL};
use crate::error::Result;
use crate::handlers::{HandlerCtx, HandlerRegistry};
use crate::tasks::{FailureOutcome, TaskNode, TaskStatus};
use crate::{AgentId, ChannelId};
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives the work queue. One instance per process.
pub struct Tick {
    deps: AgentDeps,
    registry: HandlerRegistry,
    last_log_cleanup: Mutex<Option<DateTime<Utc>>>,
}

/// Indicator work computed under the queue lock, executed outside it.
struct IndicatorPlan {
    agent_id: AgentId,
    channel_id: ChannelId,
    typing: bool,
    online: bool,
}

impl Tick {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            registry: HandlerRegistry::standard(),
            last_log_cleanup: Mutex::new(None),
        }
    }

    /// Run ticks forever at the configured cadence.
    pub async fn run_loop(&self) {
        info!("tick loop started");
        let mut n: u64 = 0;
        loop {
            n += 1;
            if let Err(error) = self.run_one_tick().await {
                warn!(%error, "tick failed");
            }
            if n % 10 == 0 {
                debug!(tick = n, "tick loop alive");
            }
            self.deps.clock.sleep(TICK_INTERVAL).await;
        }
    }

    /// One bounded scheduling step.
    pub async fn run_one_tick(&self) -> Result<()> {
        let deps = &self.deps;
        let now = deps.clock.now();

        deps.budget.reset(deps.config.media_budget_per_tick);
        self.trigger_typing_indicators().await;

        let picked = {
            let mut queue = deps.queue.lock().expect("work queue poisoned");
            queue.round_robin_one_task(now, &deps.typing)
        };
        let Some((graph_id, task_id)) = picked else {
            self.maybe_cleanup_logs(now).await;
            return Ok(());
        };

        // Snapshot the task and its conversation coordinates.
        let snapshot = {
            let queue = deps.queue.lock().expect("work queue poisoned");
            queue.graph(&graph_id).and_then(|graph| {
                graph.get(&task_id).map(|task| {
                    (
                        task.clone(),
                        graph.context.agent_id,
                        graph.context.channel_id,
                        graph.context.is_group_chat,
                    )
                })
            })
        };
        let Some((task, agent_id, channel_id, is_group_chat)) = snapshot else {
            return Ok(());
        };

        // A disabled (or vanished) agent takes its graphs with it.
        let agent = deps.registry.by_id(agent_id);
        let agent = match agent {
            Some(agent) if !agent.is_disabled() => agent,
            Some(agent) => {
                info!(agent = %agent.name(), graph = %graph_id, "agent disabled; cancelling graph");
                deps.queue.lock().expect("work queue poisoned").remove_graph(&graph_id);
                deps.persist_queue();
                return Ok(());
            }
            None => {
                warn!(agent_id, graph = %graph_id, "no agent for graph; dropping it");
                deps.queue.lock().expect("work queue poisoned").remove_graph(&graph_id);
                deps.persist_queue();
                return Ok(());
            }
        };

        info!(agent = %agent.name(), task = %task_id, kind = %task.kind, "running task");
        {
            let mut queue = deps.queue.lock().expect("work queue poisoned");
            if let Some(node) = queue.graph_mut(&graph_id).and_then(|g| g.get_mut(&task_id)) {
                node.status = TaskStatus::Active;
            }
        }
        deps.persist_queue();

        let ctx = HandlerCtx {
            agent: agent.clone(),
            deps: deps.clone(),
            graph_id: graph_id.clone(),
            agent_id,
            channel_id,
            is_group_chat,
        };

        let result = self.registry.dispatch(&ctx, &task).await;
        self.log_task_outcome(&task, agent_id, channel_id, &result, now).await;

        {
            let mut queue = deps.queue.lock().expect("work queue poisoned");
            if let Some(graph) = queue.graph_mut(&graph_id) {
                match &result {
                    Ok(()) => {
                        // The handler may have reset the task to PENDING
                        // for a mid-flight retry; leave that alone.
                        if let Some(node) = graph.get_mut(&task_id) {
                            if node.status == TaskStatus::Active {
                                node.status = TaskStatus::Done;
                            }
                        }
                    }
                    Err(error) if error.is_retryable() => {
                        warn!(task = %task_id, %error, "task failed; scheduling retry");
                        let outcome = graph.record_failure(
                            &task_id,
                            now,
                            Duration::from_secs(RETRY_WAIT_SECS),
                            MAX_RETRIES,
                        );
                        if outcome == FailureOutcome::Failed {
                            warn!(task = %task_id, "task exhausted retries");
                        }
                    }
                    Err(error) => {
                        warn!(task = %task_id, %error, "task failed permanently");
                        graph.fail_permanently(&task_id);
                    }
                }
            }
            let removed = queue.sweep_complete();
            for id in removed {
                debug!(graph = %id, "graph completed and removed");
            }
        }
        deps.persist_queue();
        self.maybe_cleanup_logs(now).await;
        Ok(())
    }

    /// Emit typing bubbles for unblocked typing-waits, or bump online
    /// presence for online-waits. Never both for one graph.
    async fn trigger_typing_indicators(&self) {
        let plans: Vec<IndicatorPlan> = {
            let queue = self.deps.queue.lock().expect("work queue poisoned");
            queue
                .graphs()
                .iter()
                .map(|graph| {
                    let (typing, online) = graph.indicator_flags();
                    IndicatorPlan {
                        agent_id: graph.context.agent_id,
                        channel_id: graph.context.channel_id,
                        typing,
                        online,
                    }
                })
                .collect()
        };

        for plan in plans {
            if !plan.typing && !plan.online {
                continue;
            }
            let Some(agent) = self.deps.registry.by_id(plan.agent_id) else {
                continue;
            };
            let Some(transport) = agent.transport() else {
                continue;
            };
            let action = if plan.typing {
                TypingAction::Typing
            } else {
                TypingAction::Cancel
            };
            if let Err(error) = transport.set_typing(plan.channel_id, action).await {
                // Not being allowed to look typing is fine.
                debug!(
                    agent = %agent.name(),
                    channel = plan.channel_id,
                    %error,
                    "typing indicator failed"
                );
            }
        }
    }

    /// Record executed actions; wait tasks are pure scheduling noise.
    async fn log_task_outcome(
        &self,
        task: &TaskNode,
        agent_id: AgentId,
        channel_id: ChannelId,
        result: &Result<()>,
        now: DateTime<Utc>,
    ) {
        if task.is_wait() || task.is_received() {
            return;
        }
        let details = serde_json::to_string(&task.params).ok();
        let failure = result.as_ref().err().map(|error| error.to_string());
        if let Err(error) = self
            .deps
            .storage
            .log_task(
                agent_id,
                channel_id,
                &task.kind,
                details.as_deref(),
                failure.as_deref(),
                Some(&task.id),
                now,
            )
            .await
        {
            debug!(%error, "failed to write task log");
        }
    }

    /// Once a day, purge task-log rows past the retention window.
    async fn maybe_cleanup_logs(&self, now: DateTime<Utc>) {
        {
            let last = self.last_log_cleanup.lock().expect("cleanup stamp poisoned");
            if let Some(last) = *last {
                if now - last < chrono::Duration::days(1) {
                    return;
                }
            }
        }
        match self.deps.storage.purge_task_logs(TASK_LOG_RETENTION_DAYS, now).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "cleaned up old task log entries"),
            Err(error) => warn!(%error, "task log cleanup failed"),
        }
        *self.last_log_cleanup.lock().expect("cleanup stamp poisoned") = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::agent_fixture;
    use crate::chat::testing::{RecordingTransport, TransportCall};
    use crate::chat::ChatMessage;
    use crate::handlers::testing::ScriptedLlm;
    use crate::tasks::{ReceivedInsert, insert_received_task};
    use std::sync::Arc;

    async fn tick_fixture(
        dir: &std::path::Path,
        llm: Arc<ScriptedLlm>,
    ) -> (Tick, Arc<RecordingTransport>, AgentDeps) {
        let (agent, deps) = agent_fixture(dir, llm).await;
        let transport = Arc::new(RecordingTransport::new(1));
        agent.set_transport(transport.clone());
        (Tick::new(deps.clone()), transport, deps)
    }

    fn seed_conversation(deps: &AgentDeps, transport: &RecordingTransport) {
        transport.add_history(ChatMessage::text_message(
            42,
            2,
            2,
            "hi",
            deps.clock.now(),
        ));
        let mut insert = ReceivedInsert::new(1, 2);
        insert.message_id = Some(42);
        let mut queue = deps.queue.lock().unwrap();
        insert_received_task(&mut queue, insert);
    }

    /// Drive ticks until the queue drains or the tick budget runs out.
    async fn drain(tick: &Tick, deps: &AgentDeps, max_ticks: usize) {
        for _ in 0..max_ticks {
            tick.run_one_tick().await.unwrap();
            deps.clock.advance(chrono::Duration::seconds(3));
            if deps.queue.lock().unwrap().is_empty() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn reply_flows_through_typing_wait_to_send() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[r#"[{"kind": "send", "message": "hello back"}]"#]);
        let (tick, transport, deps) = tick_fixture(dir.path(), llm).await;
        seed_conversation(&deps, &transport);

        drain(&tick, &deps, 10).await;

        // Exactly one markdown send, preceded by at least one typing
        // indicator while the wait was pending.
        let sends: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|call| matches!(call, TransportCall::SendMessage { .. }))
            .collect();
        assert_eq!(
            sends,
            vec![TransportCall::SendMessage {
                peer: 2,
                text: "hello back".into(),
                reply_to: None,
                markdown: true,
            }]
        );
        assert!(transport
            .typing_calls(2)
            .iter()
            .any(|action| *action == TypingAction::Typing));
        // Everything terminal: the graph was swept.
        assert!(deps.queue.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retrieval_turn_retries_and_sends_once() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[
            r#"[{"kind": "retrieve", "urls": ["file:schedule.json"]}]"#,
            r#"[{"kind": "send", "message": "summary"}]"#,
        ]);
        let (tick, transport, deps) = tick_fixture(dir.path(), llm.clone()).await;
        seed_conversation(&deps, &transport);

        // First tick runs the received task, which fetches and fails
        // transiently; a retry wait now gates it.
        tick.run_one_tick().await.unwrap();
        {
            let queue = deps.queue.lock().unwrap();
            let graph = queue.graph_for_conversation(1, 2).unwrap();
            let received = graph.tasks.iter().find(|t| t.is_received()).unwrap();
            assert_eq!(received.status, TaskStatus::Pending);
            assert!(!received.depends_on.is_empty());
            assert!(graph.context.fetched_resources.contains_key("file:schedule.json"));
        }

        drain(&tick, &deps, 20).await;

        let sends: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|call| matches!(call, TransportCall::SendMessage { .. }))
            .collect();
        assert_eq!(sends.len(), 1);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn unknown_kind_fails_permanently_and_graph_drains() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[r#"[{"kind": "frobnicate", "x": 1}]"#]);
        let (tick, transport, deps) = tick_fixture(dir.path(), llm).await;
        seed_conversation(&deps, &transport);

        drain(&tick, &deps, 10).await;
        assert!(deps.queue.lock().unwrap().is_empty());
        assert!(!transport
            .calls()
            .iter()
            .any(|call| matches!(call, TransportCall::SendMessage { .. })));
    }

    #[tokio::test]
    async fn disabled_agent_graph_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::empty();
        let (tick, transport, deps) = tick_fixture(dir.path(), llm.clone()).await;
        seed_conversation(&deps, &transport);
        deps.registry.by_name("Wendy").unwrap().set_disabled(true);

        tick.run_one_tick().await.unwrap();
        assert!(deps.queue.lock().unwrap().is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn budget_resets_every_tick() {
        let dir = tempfile::tempdir().unwrap();
        let (tick, _transport, deps) = tick_fixture(dir.path(), ScriptedLlm::empty()).await;
        deps.budget.reset(0);
        tick.run_one_tick().await.unwrap();
        assert_eq!(deps.budget.remaining(), i64::from(deps.config.media_budget_per_tick));
    }

    #[tokio::test]
    async fn one_task_dispatched_per_tick_across_graphs() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&["[]"]);
        let (tick, transport, deps) = tick_fixture(dir.path(), llm.clone()).await;
        transport.add_history(ChatMessage::text_message(1, 2, 2, "a", deps.clock.now()));
        transport.add_history(ChatMessage::text_message(1, 3, 3, "b", deps.clock.now()));
        {
            let mut queue = deps.queue.lock().unwrap();
            insert_received_task(&mut queue, ReceivedInsert::new(1, 2));
            insert_received_task(&mut queue, ReceivedInsert::new(1, 3));
        }

        tick.run_one_tick().await.unwrap();
        assert_eq!(llm.call_count(), 1);
        tick.run_one_tick().await.unwrap();
        assert_eq!(llm.call_count(), 2);
    }
}
