//! Sticker import and media export endpoints.

use super::state::{ApiError, ApiState};
use crate::ChannelId;
use crate::chat::ChatTransport as _;
use crate::media::mime::sniff_mime;
use crate::media::source::{MediaLookup, MediaSource as _};
use crate::media::{MediaItem, MediaKind};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const IMPORT_TIMEOUT: Duration = Duration::from_secs(300);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
pub struct ImportBody {
    pub set_name: String,
}

/// POST /api/agents/{agent}/stickers/import — stream a sticker set
/// through the media chain so every sticker ends up classified and
/// cached.
pub async fn import_sticker_set(
    State(state): State<Arc<ApiState>>,
    Path(agent): Path<String>,
    Json(body): Json<ImportBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (agent_handle, _) = state.authenticated_agent(&agent)?;
    let transport = agent_handle
        .transport()
        .ok_or_else(|| ApiError::conflict("agent transport is not connected"))?;

    let work = async {
        let set = transport
            .sticker_set(&body.set_name)
            .await
            .map_err(|error| ApiError::bad_request(format!("sticker set fetch failed: {error}")))?;

        // The console import is explicit operator intent; give it its own
        // generous description budget instead of the tick's.
        let budget = crate::media::DescriptionBudget::new();
        budget.reset(set.stickers.len() as u32);

        let now = state.deps.clock.now();
        let mut described = 0usize;
        let total = set.stickers.len();
        for sticker in &set.stickers {
            let mut item = MediaItem::new(MediaKind::Sticker, &sticker.unique_id)
                .with_file_ref(sticker.file_ref.clone());
            item.sticker_set_name = Some(set.short_name.clone());
            item.sticker_name = Some(sticker.name.clone());
            let record = agent_handle
                .media_chain()
                .get(&MediaLookup {
                    item: &item,
                    transport: Some(transport.as_ref()),
                    llm: Some(agent_handle.llm.as_ref()),
                    budget: Some(&budget),
                    now,
                })
                .await;
            if record.as_ref().and_then(|r| r.description_text()).is_some() {
                described += 1;
            }
        }
        Ok::<_, ApiError>(Json(json!({
            "set": set.short_name,
            "stickers": total,
            "described": described,
        })))
    };

    tokio::time::timeout(IMPORT_TIMEOUT, work)
        .await
        .map_err(|_| ApiError::internal("sticker import timed out"))?
}

/// GET /api/agents/{agent}/conversations/{channel}/media/{unique_id} —
/// download a media blob seen in a conversation, caching it under the
/// state media directory on the way out.
pub async fn export_media(
    State(state): State<Arc<ApiState>>,
    Path((agent, channel, unique_id)): Path<(String, ChannelId, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (agent_handle, _) = state.authenticated_agent(&agent)?;
    let transport = agent_handle
        .transport()
        .ok_or_else(|| ApiError::conflict("agent transport is not connected"))?;

    let work = async {
        // Find the item in the conversation's recent history or the
        // agent's Saved Messages cache.
        let mut found: Option<MediaItem> = agent_handle.saved_media_item(&unique_id);
        if found.is_none() {
            let messages = transport
                .recent_messages(channel, crate::config::HISTORY_LIMIT)
                .await
                .map_err(|error| ApiError::internal(format!("history fetch failed: {error}")))?;
            found = messages
                .iter()
                .flat_map(|message| message.media.iter())
                .find(|item| item.unique_id == unique_id)
                .cloned();
        }
        let item = found
            .ok_or_else(|| ApiError::not_found(format!("no media '{unique_id}' in view")))?;
        let file_ref = item
            .file_ref
            .as_ref()
            .ok_or_else(|| ApiError::not_found("media has no downloadable reference"))?;

        let bytes = transport
            .download(file_ref)
            .await
            .map_err(|error| ApiError::internal(format!("download failed: {error}")))?;
        let mime = sniff_mime(&bytes);

        // Opportunistic blob cache next to the description records.
        let media_dir = state.deps.config.media_dir();
        let _ = std::fs::create_dir_all(&media_dir);
        let blob_path = media_dir.join(format!(
            "{unique_id}{}",
            crate::media::mime::extension_for_mime(mime)
        ));
        if let Err(error) = std::fs::write(&blob_path, &bytes) {
            tracing::debug!(%error, "media blob cache write failed");
        }

        Ok::<_, ApiError>(([(header::CONTENT_TYPE, mime)], bytes))
    };

    tokio::time::timeout(EXPORT_TIMEOUT, work)
        .await
        .map_err(|_| ApiError::internal("media export timed out"))?
}
