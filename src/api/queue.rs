//! Work-queue endpoints: inspection, per-conversation clear, and the
//! cross-channel trigger.

use super::state::{ApiError, ApiState};
use crate::ChannelId;
use crate::tasks::{ReceivedInsert, insert_received_task};
use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// GET /api/queue — snapshot of every graph.
pub async fn get_queue(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let queue = state.deps.queue.lock().expect("work queue poisoned");
    let graphs: Vec<Value> = queue
        .graphs()
        .iter()
        .map(|graph| serde_json::to_value(graph).unwrap_or(Value::Null))
        .collect();
    Ok(Json(json!({ "graphs": graphs })))
}

/// POST /api/agents/{agent}/conversations/{channel}/clear-queue
pub async fn clear_conversation_queue(
    State(state): State<Arc<ApiState>>,
    Path((agent, channel)): Path<(String, ChannelId)>,
) -> Result<Json<Value>, ApiError> {
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    let removed = {
        let mut queue = state.deps.queue.lock().expect("work queue poisoned");
        queue.remove_conversation(agent_id, channel)
    };
    state.deps.persist_queue();
    Ok(Json(json!({ "removed_graphs": removed })))
}

#[derive(Deserialize)]
pub struct XsendBody {
    pub target_channel_id: ChannelId,
    #[serde(default)]
    pub intent: String,
}

/// POST /api/agents/{agent}/xsend — trigger a planning turn on another
/// conversation. Gag state of the target is bypassed, exactly as for the
/// model-driven `xsend` task.
pub async fn create_xsend(
    State(state): State<Arc<ApiState>>,
    Path(agent): Path<String>,
    Json(body): Json<XsendBody>,
) -> Result<Json<Value>, ApiError> {
    let (agent_handle, agent_id) = state.authenticated_agent(&agent)?;

    let mut insert = ReceivedInsert::new(agent_id, body.target_channel_id);
    insert.agent_name = Some(agent_handle.name().to_string());
    insert.xsend_intent = Some(body.intent.trim().to_string());
    if let Some(entity) = agent_handle.entity(body.target_channel_id).await {
        insert.channel_name = Some(entity.display_name());
        insert.is_group_chat = entity.is_group_or_channel();
    }

    let task_id = {
        let mut queue = state.deps.queue.lock().expect("work queue poisoned");
        insert_received_task(&mut queue, insert)
    };
    state.deps.persist_queue();
    Ok(Json(json!({ "task_id": task_id })))
}
