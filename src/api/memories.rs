//! Memory, note, plan, intention, summary, schedule, and gag endpoints.

use super::state::{ApiError, ApiState};
use crate::storage::EntryTable;
use crate::ChannelId;
use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

fn entry_table(table: &str) -> Result<EntryTable, ApiError> {
    match table {
        "memories" => Ok(EntryTable::Memories),
        "intentions" => Ok(EntryTable::Intentions),
        "notes" => Ok(EntryTable::Notes),
        "plans" => Ok(EntryTable::Plans),
        "events" => Ok(EntryTable::Events),
        other => Err(ApiError::bad_request(format!("unknown entry table '{other}'"))),
    }
}

#[derive(Deserialize)]
pub struct EntryBody {
    #[serde(default)]
    pub content: String,
}

/// GET /api/agents/{agent}/{table} — agent-scoped entries.
pub async fn list_agent_entries(
    State(state): State<Arc<ApiState>>,
    Path((agent, table)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let table = entry_table(&table)?;
    if table.channel_scoped() {
        return Err(ApiError::bad_request("table is conversation-scoped"));
    }
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    let entries = state.deps.storage.list_entries(table, agent_id, None).await?;
    Ok(Json(json!({ "entries": entries })))
}

/// PUT /api/agents/{agent}/{table}/{id} — upsert; empty content deletes.
pub async fn put_agent_entry(
    State(state): State<Arc<ApiState>>,
    Path((agent, table, entry_id)): Path<(String, String, String)>,
    Json(body): Json<EntryBody>,
) -> Result<Json<Value>, ApiError> {
    let table = entry_table(&table)?;
    if table.channel_scoped() {
        return Err(ApiError::bad_request("table is conversation-scoped"));
    }
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    write_entry(&state, table, agent_id, None, &entry_id, &body.content).await
}

/// GET /api/agents/{agent}/conversations/{channel}/{table}
pub async fn list_conversation_entries(
    State(state): State<Arc<ApiState>>,
    Path((agent, channel, table)): Path<(String, ChannelId, String)>,
) -> Result<Json<Value>, ApiError> {
    let table = entry_table(&table)?;
    if !table.channel_scoped() {
        return Err(ApiError::bad_request("table is agent-scoped"));
    }
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    let entries = state
        .deps
        .storage
        .list_entries(table, agent_id, Some(channel))
        .await?;
    Ok(Json(json!({ "entries": entries })))
}

/// PUT /api/agents/{agent}/conversations/{channel}/{table}/{id}
pub async fn put_conversation_entry(
    State(state): State<Arc<ApiState>>,
    Path((agent, channel, table, entry_id)): Path<(String, ChannelId, String, String)>,
    Json(body): Json<EntryBody>,
) -> Result<Json<Value>, ApiError> {
    let table = entry_table(&table)?;
    if !table.channel_scoped() {
        return Err(ApiError::bad_request("table is agent-scoped"));
    }
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    write_entry(&state, table, agent_id, Some(channel), &entry_id, &body.content).await
}

async fn write_entry(
    state: &ApiState,
    table: EntryTable,
    agent_id: i64,
    channel: Option<ChannelId>,
    entry_id: &str,
    content: &str,
) -> Result<Json<Value>, ApiError> {
    let content = content.trim();
    let storage = &state.deps.storage;
    if content.is_empty() {
        let removed = storage.remove_entry(table, agent_id, channel, entry_id).await?;
        Ok(Json(json!({ "deleted": removed })))
    } else {
        storage
            .upsert_entry(table, agent_id, channel, entry_id, content, state.deps.clock.now())
            .await?;
        Ok(Json(json!({ "ok": true })))
    }
}

/// GET /api/agents/{agent}/conversations/{channel}/summaries
pub async fn list_summaries(
    State(state): State<Arc<ApiState>>,
    Path((agent, channel)): Path<(String, ChannelId)>,
) -> Result<Json<Value>, ApiError> {
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    let summaries = state.deps.storage.summaries(agent_id, channel).await?;
    Ok(Json(json!({ "summaries": summaries })))
}

/// DELETE /api/agents/{agent}/conversations/{channel}/summaries
pub async fn clear_summaries(
    State(state): State<Arc<ApiState>>,
    Path((agent, channel)): Path<(String, ChannelId)>,
) -> Result<Json<Value>, ApiError> {
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    let cleared = state.deps.storage.clear_summaries(agent_id, channel).await?;
    Ok(Json(json!({ "cleared": cleared })))
}

/// GET /api/agents/{agent}/schedule
pub async fn get_schedule(
    State(state): State<Arc<ApiState>>,
    Path(agent): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    let schedule = state.deps.storage.load_schedule(agent_id).await?;
    Ok(Json(json!({ "schedule": schedule })))
}

/// PUT /api/agents/{agent}/schedule
pub async fn put_schedule(
    State(state): State<Arc<ApiState>>,
    Path(agent): Path<String>,
    Json(schedule): Json<crate::schedule::Schedule>,
) -> Result<Json<Value>, ApiError> {
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    let mut schedule = schedule;
    let now = state.deps.clock.now();
    schedule.prune(now);
    state.deps.storage.save_schedule(agent_id, &schedule, now).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct GagBody {
    pub gagged: bool,
}

/// PUT /api/agents/{agent}/conversations/{channel}/gagged
pub async fn put_gagged(
    State(state): State<Arc<ApiState>>,
    Path((agent, channel)): Path<(String, ChannelId)>,
    Json(body): Json<GagBody>,
) -> Result<Json<Value>, ApiError> {
    let (_, agent_id) = state.authenticated_agent(&agent)?;
    state.deps.storage.set_gagged(agent_id, channel, body.gagged).await?;
    Ok(Json(json!({ "ok": true })))
}
