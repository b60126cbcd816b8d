//! Coalescing inbound events into graphs, and replanning on new ones.

use super::graph::{GraphContext, Params, TaskGraph, TaskNode, TaskStatus, generate_task_id};
use super::queue::WorkQueue;
use crate::{AgentId, ChannelId, MessageId};
use serde_json::Value;

/// A wait task with the duration-based format. The countdown begins when
/// its dependencies complete, not when it is created.
pub fn make_wait_task(duration_secs: u64, preserve: bool) -> TaskNode {
    let mut params = Params::new();
    params.insert("duration".to_string(), Value::from(duration_secs));
    if preserve {
        params.insert("preserve".to_string(), Value::Bool(true));
    }
    TaskNode::new("wait", params)
}

/// A wait that shows the agent typing while it counts down.
pub fn make_typing_wait(duration_secs: u64) -> TaskNode {
    let mut task = make_wait_task(duration_secs, false);
    task.params.insert("typing".to_string(), Value::Bool(true));
    task
}

/// One inbound event that needs a planning turn: a new message, a marked
/// unread dialog, a reaction on an agent message, or a cross-channel
/// trigger.
#[derive(Debug, Clone, Default)]
pub struct ReceivedInsert {
    pub agent_id: AgentId,
    pub channel_id: ChannelId,
    pub agent_name: Option<String>,
    pub channel_name: Option<String>,
    pub is_group_chat: bool,
    pub message_id: Option<MessageId>,
    pub is_callout: bool,
    pub reaction_message_id: Option<MessageId>,
    pub clear_mentions: bool,
    pub clear_reactions: bool,
    pub xsend_intent: Option<String>,
}

impl ReceivedInsert {
    pub fn new(agent_id: AgentId, channel_id: ChannelId) -> Self {
        Self {
            agent_id,
            channel_id,
            ..Default::default()
        }
    }
}

/// Insert (or coalesce into) the conversation's `received` task.
///
/// If the conversation already has a live `received` task the event is
/// merged into it, which keeps duplicate reaction deliveries idempotent.
/// Otherwise the old graph is replanned: terminal tasks are kept as the
/// dependency record, preserve-flagged live tasks survive, everything else
/// is cancelled, and a fresh `received` task is appended behind the last
/// survivor. Returns the id of the `received` task that now represents the
/// event.
pub fn insert_received_task(queue: &mut WorkQueue, insert: ReceivedInsert) -> String {
    // Coalesce into a live received task when one exists.
    if let Some(graph_id) = queue.graph_id_for_conversation(insert.agent_id, insert.channel_id) {
        let graph = queue.graph_mut(&graph_id).expect("graph just looked up");
        if let Some(task) = graph
            .tasks
            .iter_mut()
            .find(|task| task.is_received() && !task.status.is_terminal())
        {
            merge_into_received(task, &insert);
            tracing::debug!(
                agent = insert.agent_id,
                channel = insert.channel_id,
                task = %task.id,
                "coalesced event into live received task"
            );
            return task.id.clone();
        }
    }

    // Replan: carry history and preserve-flagged work into a new graph.
    let mut carried_tasks = Vec::new();
    let mut fetched_resources = Default::default();
    let mut last_preserved: Option<String> = None;

    if let Some(old) = queue
        .graph_id_for_conversation(insert.agent_id, insert.channel_id)
        .and_then(|id| queue.remove_graph(&id))
    {
        fetched_resources = old.context.fetched_resources;
        for mut task in old.tasks {
            if !task.status.is_terminal() {
                if task.preserve() {
                    last_preserved = Some(task.id.clone());
                } else {
                    task.status = TaskStatus::Cancelled;
                }
            }
            // Terminal tasks ride along unchanged: later tasks may still
            // name them in depends_on.
            carried_tasks.push(task);
        }
    }
    queue.remove_conversation(insert.agent_id, insert.channel_id);

    let mut graph = TaskGraph::new(GraphContext {
        agent_id: insert.agent_id,
        channel_id: insert.channel_id,
        agent_name: insert.agent_name.clone(),
        channel_name: insert.channel_name.clone(),
        is_group_chat: insert.is_group_chat,
        fetched_resources,
    });
    graph.tasks = carried_tasks;

    let mut received = TaskNode::new("received", received_params(&insert))
        .with_id(generate_task_id("received"));
    if let Some(dep) = last_preserved {
        received.depends_on.push(dep);
    }
    let task_id = received.id.clone();
    graph.add_task(received);

    tracing::info!(
        agent = insert.agent_id,
        channel = insert.channel_id,
        graph = %graph.id,
        task = %task_id,
        "inserted received task"
    );
    queue.add_graph(graph);
    task_id
}

fn received_params(insert: &ReceivedInsert) -> Params {
    let mut params = Params::new();
    if let Some(message_id) = insert.message_id {
        params.insert("message_id".to_string(), Value::from(message_id));
    }
    if insert.is_callout {
        params.insert("callout".to_string(), Value::Bool(true));
    }
    if let Some(reaction_id) = insert.reaction_message_id {
        params.insert(
            "reaction_message_ids".to_string(),
            Value::Array(vec![Value::from(reaction_id)]),
        );
    }
    if insert.clear_mentions {
        params.insert("clear_mentions".to_string(), Value::Bool(true));
    }
    if insert.clear_reactions {
        params.insert("clear_reactions".to_string(), Value::Bool(true));
    }
    if let Some(intent) = insert.xsend_intent.as_deref() {
        params.insert("xsend_intent".to_string(), Value::from(intent));
    }
    params
}

fn merge_into_received(task: &mut TaskNode, insert: &ReceivedInsert) {
    if insert.is_callout {
        task.params.insert("callout".to_string(), Value::Bool(true));
    }
    if insert.clear_mentions {
        task.params
            .insert("clear_mentions".to_string(), Value::Bool(true));
    }
    if insert.clear_reactions {
        task.params
            .insert("clear_reactions".to_string(), Value::Bool(true));
    }
    if let Some(message_id) = insert.message_id {
        task.params
            .insert("message_id".to_string(), Value::from(message_id));
    }
    if let Some(intent) = insert.xsend_intent.as_deref() {
        task.params
            .insert("xsend_intent".to_string(), Value::from(intent));
    }
    if let Some(reaction_id) = insert.reaction_message_id {
        let mut ids = task.reaction_message_ids();
        if !ids.contains(&reaction_id) {
            ids.push(reaction_id);
        }
        task.params.insert(
            "reaction_message_ids".to_string(),
            Value::Array(ids.into_iter().map(Value::from).collect()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(agent: AgentId, channel: ChannelId) -> ReceivedInsert {
        ReceivedInsert::new(agent, channel)
    }

    fn received_tasks(queue: &WorkQueue, agent: AgentId, channel: ChannelId) -> Vec<&TaskNode> {
        queue
            .graph_for_conversation(agent, channel)
            .map(|graph| graph.tasks.iter().filter(|t| t.is_received()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn first_event_creates_one_graph_and_task() {
        let mut queue = WorkQueue::new();
        let mut event = insert(1, 2);
        event.message_id = Some(42);
        insert_received_task(&mut queue, event);

        assert_eq!(queue.graphs().len(), 1);
        let tasks = received_tasks(&queue, 1, 2);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].param_i64("message_id"), Some(42));
    }

    #[test]
    fn duplicate_reactions_coalesce_without_duplicates() {
        let mut queue = WorkQueue::new();
        for _ in 0..2 {
            let mut event = insert(1, 2);
            event.reaction_message_id = Some(42);
            insert_received_task(&mut queue, event);
        }

        let tasks = received_tasks(&queue, 1, 2);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].reaction_message_ids(), vec![42]);

        let mut third = insert(1, 2);
        third.reaction_message_id = Some(43);
        insert_received_task(&mut queue, third);
        let tasks = received_tasks(&queue, 1, 2);
        assert_eq!(tasks[0].reaction_message_ids(), vec![42, 43]);
    }

    #[test]
    fn coalescing_merges_flags_and_latest_message() {
        let mut queue = WorkQueue::new();
        let mut first = insert(1, 2);
        first.message_id = Some(10);
        let id_a = insert_received_task(&mut queue, first);

        let mut second = insert(1, 2);
        second.message_id = Some(11);
        second.is_callout = true;
        second.clear_mentions = true;
        let id_b = insert_received_task(&mut queue, second);

        assert_eq!(id_a, id_b);
        let tasks = received_tasks(&queue, 1, 2);
        assert_eq!(tasks[0].param_i64("message_id"), Some(11));
        assert!(tasks[0].param_bool("callout"));
        assert!(tasks[0].param_bool("clear_mentions"));
    }

    #[test]
    fn replan_preserves_flagged_tasks_and_resources() {
        let mut queue = WorkQueue::new();

        // A finished turn: send pending, one preserve-wait, one plain wait.
        let mut graph = TaskGraph::new(GraphContext {
            agent_id: 1,
            channel_id: 2,
            ..Default::default()
        });
        graph.add_task(TaskNode::new("send", Params::new()).with_id("send-1"));
        graph.add_task(make_wait_task(300, true).with_id("wait-preserve"));
        graph.add_task(make_wait_task(10, false).with_id("wait-regular"));
        graph
            .context
            .fetched_resources
            .insert("u".to_string(), "c".to_string());
        // Mark the received task DONE so a new event replans instead of
        // coalescing.
        let mut done = TaskNode::new("received", Params::new()).with_id("received-old");
        done.status = TaskStatus::Done;
        graph.add_task(done);
        queue.add_graph(graph);

        let mut event = insert(1, 2);
        event.message_id = Some(99);
        insert_received_task(&mut queue, event);

        assert_eq!(queue.graphs().len(), 1);
        let graph = queue.graph_for_conversation(1, 2).unwrap();
        assert_eq!(graph.get("wait-preserve").unwrap().status, TaskStatus::Pending);
        assert_eq!(graph.get("send-1").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(graph.get("wait-regular").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(graph.get("received-old").unwrap().status, TaskStatus::Done);
        assert_eq!(graph.context.fetched_resources.get("u"), Some(&"c".to_string()));

        let new_received = graph
            .tasks
            .iter()
            .find(|t| t.is_received() && t.status == TaskStatus::Pending)
            .unwrap();
        assert_eq!(new_received.param_i64("message_id"), Some(99));
        assert_eq!(new_received.depends_on, vec!["wait-preserve".to_string()]);
    }

    #[test]
    fn completed_tasks_survive_replan_untouched() {
        let mut queue = WorkQueue::new();
        let mut graph = TaskGraph::new(GraphContext {
            agent_id: 1,
            channel_id: 2,
            ..Default::default()
        });
        let mut done = TaskNode::new("send", Params::new()).with_id("send-done");
        done.status = TaskStatus::Done;
        graph.add_task(done);
        let mut failed = TaskNode::new("send", Params::new()).with_id("send-failed");
        failed.status = TaskStatus::Failed;
        graph.add_task(failed);
        queue.add_graph(graph);

        insert_received_task(&mut queue, insert(1, 2));
        let graph = queue.graph_for_conversation(1, 2).unwrap();
        assert_eq!(graph.get("send-done").unwrap().status, TaskStatus::Done);
        assert_eq!(graph.get("send-failed").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn conversations_do_not_cross_coalesce() {
        let mut queue = WorkQueue::new();
        insert_received_task(&mut queue, insert(1, 2));
        insert_received_task(&mut queue, insert(1, 3));
        assert_eq!(queue.graphs().len(), 2);
    }
}
