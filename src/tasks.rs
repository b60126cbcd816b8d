//! Per-conversation task graphs, the process-wide work queue, and the
//! replanning/coalescing rules for inbound events.

pub mod graph;
pub mod queue;
pub mod replan;

pub use graph::{FailureOutcome, GraphContext, TaskGraph, TaskNode, TaskStatus, generate_task_id};
pub use queue::{SharedWorkQueue, WorkQueue};
pub use replan::{ReceivedInsert, insert_received_task, make_typing_wait, make_wait_task};
