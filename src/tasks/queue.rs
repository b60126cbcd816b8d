//! Process-wide work queue: round-robin scheduling and snapshot
//! persistence.

use super::graph::{TaskGraph, TaskStatus};
use crate::error::{Result, StorageError};
use crate::typing::TypingState;
use crate::{AgentId, ChannelId};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Queue handle shared between the tick loop, agent runtimes, and the
/// admin console. All mutations take the lock.
pub type SharedWorkQueue = Arc<Mutex<WorkQueue>>;

/// Owns every in-flight task graph plus the round-robin cursor.
#[derive(Debug, Default)]
pub struct WorkQueue {
    graphs: Vec<TaskGraph>,
    cursor: usize,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedWorkQueue {
        Arc::new(Mutex::new(self))
    }

    pub fn graphs(&self) -> &[TaskGraph] {
        &self.graphs
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn add_graph(&mut self, graph: TaskGraph) {
        self.graphs.push(graph);
    }

    pub fn graph(&self, graph_id: &str) -> Option<&TaskGraph> {
        self.graphs.iter().find(|graph| graph.id == graph_id)
    }

    pub fn graph_mut(&mut self, graph_id: &str) -> Option<&mut TaskGraph> {
        self.graphs.iter_mut().find(|graph| graph.id == graph_id)
    }

    pub fn remove_graph(&mut self, graph_id: &str) -> Option<TaskGraph> {
        let index = self.graphs.iter().position(|graph| graph.id == graph_id)?;
        let removed = self.graphs.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        Some(removed)
    }

    /// At most one graph exists per `(agent, conversation)` pair.
    pub fn graph_for_conversation(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
    ) -> Option<&TaskGraph> {
        self.graphs.iter().find(|graph| {
            graph.context.agent_id == agent_id && graph.context.channel_id == channel_id
        })
    }

    pub fn graph_id_for_conversation(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
    ) -> Option<String> {
        self.graph_for_conversation(agent_id, channel_id)
            .map(|graph| graph.id.clone())
    }

    /// Drop every graph belonging to the conversation.
    pub fn remove_conversation(&mut self, agent_id: AgentId, channel_id: ChannelId) -> usize {
        let before = self.graphs.len();
        self.graphs.retain(|graph| {
            !(graph.context.agent_id == agent_id && graph.context.channel_id == channel_id)
        });
        let removed = before - self.graphs.len();
        if removed > 0 {
            self.cursor = 0;
        }
        removed
    }

    /// Drop completed graphs, returning their ids.
    pub fn sweep_complete(&mut self) -> Vec<String> {
        let ids: Vec<String> = self
            .graphs
            .iter()
            .filter(|graph| graph.is_complete())
            .map(|graph| graph.id.clone())
            .collect();
        for id in &ids {
            self.remove_graph(id);
        }
        ids
    }

    /// Advance round-robin from the cursor, returning the first ready task
    /// of the first graph that has one. The cursor lands just past that
    /// graph so deep graphs cannot starve other conversations.
    pub fn round_robin_one_task(
        &mut self,
        now: DateTime<Utc>,
        typing: &TypingState,
    ) -> Option<(String, String)> {
        if self.graphs.is_empty() {
            return None;
        }
        let len = self.graphs.len();
        let start = self.cursor % len;
        for step in 0..len {
            let index = (start + step) % len;
            if let Some(task_id) = self.graphs[index].first_ready_task(now, typing) {
                let graph_id = self.graphs[index].id.clone();
                self.cursor = (index + 1) % len;
                return Some((graph_id, task_id));
            }
        }
        None
    }

    /// Render the snapshot: one fenced JSON block per graph under a
    /// `## Task Graph:` header.
    pub fn serialize(&self) -> String {
        let mut out = String::from("# Work Queue Snapshot\n\n");
        for graph in &self.graphs {
            out.push_str(&format!("## Task Graph: {}\n", graph.id));
            let block = serde_json::to_string_pretty(graph).expect("graph serializes");
            out.push_str("```json\n");
            out.push_str(&block);
            out.push_str("\n```\n\n");
        }
        out
    }

    /// Parse a snapshot. Tasks found ACTIVE are reset to PENDING: the
    /// process died mid-dispatch and the work must re-run.
    pub fn deserialize(text: &str) -> Result<Self> {
        let mut graphs = Vec::new();
        for block in text.split("```json").skip(1) {
            let json_part = block
                .split("```")
                .next()
                .ok_or_else(|| StorageError::Malformed("unterminated JSON fence".into()))?;
            let mut graph: TaskGraph = serde_json::from_str(json_part)
                .map_err(|e| StorageError::Malformed(format!("bad graph block: {e}")))?;
            for task in &mut graph.tasks {
                if task.status == TaskStatus::Active {
                    task.status = TaskStatus::Pending;
                }
            }
            graphs.push(graph);
        }
        Ok(Self { graphs, cursor: 0 })
    }

    /// Write the snapshot via temp-file rename, keeping the previous
    /// snapshot as `.bak`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = path.with_extension("md.tmp");
        let bak = path.with_extension("md.bak");
        if path.exists() {
            std::fs::copy(path, &bak).with_context(|| format!("backing up {}", path.display()))?;
        }
        std::fs::write(&tmp, self.serialize())
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    /// Load a snapshot; a missing file yields an empty queue.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::deserialize(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::graph::{GraphContext, Params, TaskNode};
    use indoc::indoc;

    fn graph_for(agent_id: AgentId, channel_id: ChannelId, task_ids: &[&str]) -> TaskGraph {
        let mut graph = TaskGraph::new(GraphContext {
            agent_id,
            channel_id,
            ..Default::default()
        });
        for id in task_ids {
            graph.add_task(TaskNode::new("send", Params::new()).with_id(*id));
        }
        graph
    }

    #[test]
    fn round_robin_rotates_across_graphs() {
        let mut queue = WorkQueue::new();
        queue.add_graph(graph_for(1, 10, &["a1", "a2"]));
        queue.add_graph(graph_for(1, 20, &["b1"]));
        let typing = TypingState::new();
        let now = Utc::now();

        let (g1, t1) = queue.round_robin_one_task(now, &typing).unwrap();
        let (g2, t2) = queue.round_robin_one_task(now, &typing).unwrap();
        assert_ne!(g1, g2, "second tick must visit the other conversation");
        assert_eq!(t1, "a1");
        assert_eq!(t2, "b1");

        // Back to the first graph's next task.
        queue.graph_mut(&g1).unwrap().get_mut("a1").unwrap().status = TaskStatus::Done;
        let (g3, t3) = queue.round_robin_one_task(now, &typing).unwrap();
        assert_eq!(g3, g1);
        assert_eq!(t3, "a2");
    }

    #[test]
    fn one_graph_per_conversation_lookup() {
        let mut queue = WorkQueue::new();
        queue.add_graph(graph_for(1, 10, &["a"]));
        queue.add_graph(graph_for(2, 10, &["b"]));
        assert!(queue.graph_for_conversation(1, 10).is_some());
        assert!(queue.graph_for_conversation(1, 20).is_none());
        assert_eq!(queue.remove_conversation(1, 10), 1);
        assert!(queue.graph_for_conversation(1, 10).is_none());
    }

    #[test]
    fn snapshot_round_trips_and_resets_active() {
        let mut queue = WorkQueue::new();
        let mut graph = graph_for(1, 10, &["a", "b"]);
        graph.get_mut("a").unwrap().status = TaskStatus::Active;
        graph.get_mut("b").unwrap().status = TaskStatus::Done;
        graph
            .context
            .fetched_resources
            .insert("https://example.test/x".into(), "body".into());
        queue.add_graph(graph);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work_queue.md");
        queue.save(&path).unwrap();

        let loaded = WorkQueue::load(&path).unwrap();
        assert_eq!(loaded.graphs().len(), 1);
        let graph = &loaded.graphs()[0];
        assert_eq!(graph.get("a").unwrap().status, TaskStatus::Pending);
        assert_eq!(graph.get("b").unwrap().status, TaskStatus::Done);
        assert_eq!(
            graph.context.fetched_resources.get("https://example.test/x"),
            Some(&"body".to_string())
        );

        // Saving twice keeps a backup of the previous snapshot.
        queue.save(&path).unwrap();
        assert!(path.with_extension("md.bak").exists());
    }

    #[test]
    fn load_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = WorkQueue::load(&dir.path().join("nope.md")).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn deserialize_parses_handwritten_snapshot() {
        let text = indoc! {r#"
            # Work Queue Snapshot

            ## Task Graph: recv-00000001
            ```json
            {
              "id": "recv-00000001",
              "context": { "agent_id": 7, "channel_id": 9 },
              "tasks": [
                { "id": "received-1", "type": "received", "status": "active" }
              ]
            }
            ```
        "#};
        let queue = WorkQueue::deserialize(text).unwrap();
        let graph = queue.graph("recv-00000001").unwrap();
        assert_eq!(graph.context.agent_id, 7);
        assert_eq!(graph.get("received-1").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn sweep_removes_only_complete_graphs() {
        let mut queue = WorkQueue::new();
        let mut done = graph_for(1, 10, &["a"]);
        done.get_mut("a").unwrap().status = TaskStatus::Done;
        let done_id = done.id.clone();
        queue.add_graph(done);
        queue.add_graph(graph_for(1, 20, &["b"]));

        let swept = queue.sweep_complete();
        assert_eq!(swept, vec![done_id]);
        assert_eq!(queue.graphs().len(), 1);
    }
}
