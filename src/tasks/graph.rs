//! Task nodes, graphs, readiness, and the failure/retry machinery.

use crate::typing::TypingState;
use crate::{AgentId, ChannelId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Opaque task parameters as handed back by the LLM.
pub type Params = serde_json::Map<String, Value>;

/// Lifecycle of a task. Done, failed, and cancelled are terminal and never
/// reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

/// Mint a graph-unique task id for a kind: `send-3fa9c1d2`.
pub fn generate_task_id(kind: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{kind}-{}", &suffix[..8])
}

/// One operation within a graph. Dependencies reference ids in the same
/// graph only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

impl TaskNode {
    pub fn new(kind: &str, params: Params) -> Self {
        Self {
            id: generate_task_id(kind),
            kind: kind.to_string(),
            params,
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_bool(&self, key: &str) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes"),
            _ => false,
        }
    }

    pub fn is_wait(&self) -> bool {
        self.kind == "wait"
    }

    pub fn is_received(&self) -> bool {
        self.kind == "received"
    }

    /// Survives replanning.
    pub fn preserve(&self) -> bool {
        self.param_bool("preserve")
    }

    /// Emits a typing indicator while pending.
    pub fn typing_flag(&self) -> bool {
        self.param_bool("typing")
    }

    /// Emits online presence (no typing bubble) while pending.
    pub fn online_flag(&self) -> bool {
        self.param_bool("online")
    }

    /// Absolute deadline for a wait task, once fixed.
    pub fn wait_until(&self) -> Option<DateTime<Utc>> {
        self.param_str("until")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Relative duration for a wait task that has not started counting yet.
    pub fn wait_duration_secs(&self) -> Option<f64> {
        self.param_f64("duration")
    }

    pub fn previous_retries(&self) -> u32 {
        self.param_i64("previous_retries").unwrap_or(0).max(0) as u32
    }

    pub fn reaction_message_ids(&self) -> Vec<MessageId> {
        self.params
            .get("reaction_message_ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default()
    }
}

/// Conversation-scoped context shared by every task in a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphContext {
    pub agent_id: AgentId,
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_group_chat: bool,
    /// URL content kept alive across replans by preserve-waits.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fetched_resources: BTreeMap<String, String>,
}

/// What `record_failure` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// A retry wait was injected and the task re-queued.
    Retrying { wait_id: String },
    /// Retries are exhausted; the task failed and its dependents were
    /// cancelled.
    Failed,
}

/// The set of tasks for one `(agent, conversation)` pair in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    pub id: String,
    pub context: GraphContext,
    pub tasks: Vec<TaskNode>,
}

impl TaskGraph {
    pub fn new(context: GraphContext) -> Self {
        Self {
            id: generate_task_id("recv"),
            context,
            tasks: Vec::new(),
        }
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut TaskNode> {
        self.tasks.iter_mut().find(|task| task.id == task_id)
    }

    pub fn add_task(&mut self, task: TaskNode) {
        self.tasks.push(task);
    }

    /// Every task reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|task| task.status.is_terminal())
    }

    /// Ids that satisfy dependencies: done and cancelled tasks. A failed
    /// dependency never satisfies; `record_failure` cancels dependents so
    /// the graph still drains.
    fn satisfied_ids(&self) -> HashSet<&str> {
        self.tasks
            .iter()
            .filter(|task| matches!(task.status, TaskStatus::Done | TaskStatus::Cancelled))
            .map(|task| task.id.as_str())
            .collect()
    }

    /// All dependencies exist in this graph and are satisfied.
    pub fn is_unblocked(&self, task: &TaskNode) -> bool {
        let satisfied = self.satisfied_ids();
        task.depends_on.iter().all(|dep| satisfied.contains(dep.as_str()))
    }

    /// Fix deadlines for duration-based waits whose dependencies just
    /// completed. The countdown starts here, not at creation, so serial
    /// waits accumulate.
    fn start_unblocked_waits(&mut self, now: DateTime<Utc>) {
        let unblocked: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| {
                task.is_wait()
                    && task.status == TaskStatus::Pending
                    && task.wait_until().is_none()
                    && task.wait_duration_secs().is_some()
                    && self.is_unblocked(task)
            })
            .map(|task| task.id.clone())
            .collect();

        for id in unblocked {
            let Some(task) = self.get_mut(&id) else { continue };
            let duration = task.wait_duration_secs().unwrap_or(0.0);
            let until = now + chrono::Duration::milliseconds((duration * 1000.0) as i64);
            task.params
                .insert("until".to_string(), Value::String(until.to_rfc3339()));
        }
    }

    fn is_ready(&self, task: &TaskNode, now: DateTime<Utc>, typing: &TypingState) -> bool {
        if task.status != TaskStatus::Pending {
            return false;
        }
        if !self.is_unblocked(task) {
            return false;
        }
        if task.is_wait() {
            match task.wait_until() {
                Some(until) => {
                    if now < until {
                        return false;
                    }
                }
                // A wait with neither deadline nor duration can never fire.
                None => return false,
            }
        }
        // Hold back planning turns in DMs while the partner is typing.
        if task.is_received()
            && !self.context.is_group_chat
            && typing.is_partner_recently_typing(
                self.context.agent_id,
                self.context.channel_id,
                now,
            )
        {
            return false;
        }
        true
    }

    /// First ready task id, fixing wait deadlines as a side effect.
    pub fn first_ready_task(&mut self, now: DateTime<Utc>, typing: &TypingState) -> Option<String> {
        self.start_unblocked_waits(now);
        self.tasks
            .iter()
            .find(|task| self.is_ready(task, now, typing))
            .map(|task| task.id.clone())
    }

    /// Whether any pending typing-wait is unblocked (drives the typing
    /// indicator), and whether any pending online-wait is unblocked.
    pub fn indicator_flags(&self) -> (bool, bool) {
        let mut typing = false;
        let mut online = false;
        for task in &self.tasks {
            if !task.is_wait() || task.status != TaskStatus::Pending || !self.is_unblocked(task) {
                continue;
            }
            typing |= task.typing_flag();
            online |= task.online_flag();
        }
        (typing, online)
    }

    /// Handle a handler failure: re-queue behind a fresh retry wait, or
    /// fail the task and cancel everything that depends on it.
    pub fn record_failure(
        &mut self,
        task_id: &str,
        now: DateTime<Utc>,
        retry_wait: std::time::Duration,
        max_retries: u32,
    ) -> FailureOutcome {
        let Some(task) = self.get_mut(task_id) else {
            return FailureOutcome::Failed;
        };
        let retries = task.previous_retries() + 1;
        task.params
            .insert("previous_retries".to_string(), Value::from(retries));

        if retries >= max_retries {
            task.status = TaskStatus::Failed;
            let failed_id = task.id.clone();
            self.cancel_dependents_of(&failed_id);
            return FailureOutcome::Failed;
        }

        let wait_id = format!("wait-retry-{task_id}-{retries}");
        let until = now + chrono::Duration::from_std(retry_wait).expect("retry wait fits");
        let mut params = Params::new();
        params.insert("until".to_string(), Value::String(until.to_rfc3339()));
        let wait = TaskNode::new("wait", params).with_id(wait_id.clone());
        self.add_task(wait);

        let task = self.get_mut(task_id).expect("task still present");
        task.depends_on.push(wait_id.clone());
        task.status = TaskStatus::Pending;
        FailureOutcome::Retrying { wait_id }
    }

    /// Mark the task failed without retrying and cancel its dependents.
    pub fn fail_permanently(&mut self, task_id: &str) {
        if let Some(task) = self.get_mut(task_id) {
            task.status = TaskStatus::Failed;
        }
        self.cancel_dependents_of(task_id);
    }

    /// Cancel every non-terminal task that transitively depends on `root`.
    fn cancel_dependents_of(&mut self, root: &str) {
        let mut doomed: HashSet<String> = HashSet::new();
        doomed.insert(root.to_string());
        loop {
            let mut grew = false;
            for task in &self.tasks {
                if doomed.contains(&task.id) || task.status.is_terminal() {
                    continue;
                }
                if task.depends_on.iter().any(|dep| doomed.contains(dep)) {
                    doomed.insert(task.id.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        doomed.remove(root);
        for task in &mut self.tasks {
            if doomed.contains(&task.id) && !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
            }
        }
    }
}
