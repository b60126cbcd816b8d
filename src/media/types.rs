//! Media item and description record types.

use crate::chat::FileRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of media a message part is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Sticker,
    AnimatedSticker,
    Video,
    Gif,
    Animation,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Sticker => "sticker",
            MediaKind::AnimatedSticker => "animated_sticker",
            MediaKind::Video => "video",
            MediaKind::Gif => "gif",
            MediaKind::Animation => "animation",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    pub fn is_sticker(self) -> bool {
        matches!(self, MediaKind::Sticker | MediaKind::AnimatedSticker)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One media part extracted from a chat message. Two items with the same
/// `unique_id` are the same media regardless of which message carried them.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub unique_id: String,
    pub mime: Option<String>,
    pub sticker_set_name: Option<String>,
    pub sticker_set_title: Option<String>,
    pub sticker_name: Option<String>,
    pub duration_secs: Option<f64>,
    /// Opaque handle the transport can download.
    pub file_ref: Option<FileRef>,
}

impl MediaItem {
    pub fn new(kind: MediaKind, unique_id: impl Into<String>) -> Self {
        Self {
            kind,
            unique_id: unique_id.into(),
            mime: None,
            sticker_set_name: None,
            sticker_set_title: None,
            sticker_name: None,
            duration_secs: None,
            file_ref: None,
        }
    }

    pub fn with_file_ref(mut self, file_ref: FileRef) -> Self {
        self.file_ref = Some(file_ref);
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Outcome of a description lookup or generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    Ok,
    NotUnderstood,
    BudgetExhausted,
    UnsupportedFormat,
    Timeout,
    Error,
    PendingDescription,
    Curated,
}

impl MediaStatus {
    fn curated() -> Self {
        MediaStatus::Curated
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaStatus::Ok => "ok",
            MediaStatus::NotUnderstood => "not_understood",
            MediaStatus::BudgetExhausted => "budget_exhausted",
            MediaStatus::UnsupportedFormat => "unsupported_format",
            MediaStatus::Timeout => "timeout",
            MediaStatus::Error => "error",
            MediaStatus::PendingDescription => "pending_description",
            MediaStatus::Curated => "curated",
        }
    }
}

/// Persisted description record for one `unique_id`. Serialized as
/// `<unique_id>.json` in cache and curated directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hand-written curated files may omit the status; they read as
    /// curated.
    #[serde(default = "MediaStatus::curated")]
    pub status: MediaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_set_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(default = "Utc::now")]
    pub ts: DateTime<Utc>,
}

impl MediaRecord {
    /// Successful record. Callers must pass a non-empty description; an
    /// `ok` record with an empty description is invalid.
    pub fn ok(unique_id: &str, description: impl Into<String>, ts: DateTime<Utc>) -> Self {
        let description = description.into();
        debug_assert!(!description.trim().is_empty());
        Self {
            unique_id: Some(unique_id.to_string()),
            description: Some(description),
            status: MediaStatus::Ok,
            kind: None,
            sticker_set_name: None,
            sticker_name: None,
            mime_type: None,
            failure_reason: None,
            retryable: false,
            ts,
        }
    }

    /// Failure or gate record with no description.
    pub fn failure(
        unique_id: &str,
        status: MediaStatus,
        failure_reason: Option<String>,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            unique_id: Some(unique_id.to_string()),
            description: None,
            status,
            kind: None,
            sticker_set_name: None,
            sticker_name: None,
            mime_type: None,
            failure_reason,
            retryable: false,
            ts,
        }
    }

    pub fn with_item_metadata(mut self, item: &MediaItem) -> Self {
        self.kind = Some(item.kind);
        self.sticker_set_name = item.sticker_set_name.clone();
        self.sticker_name = item.sticker_name.clone();
        self.mime_type = item.mime.clone();
        self
    }

    pub fn with_retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn description_text(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}
