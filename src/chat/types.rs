//! Value types crossing the chat transport boundary.

use crate::media::MediaItem;
use crate::{ChannelId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle to a downloadable file. The transport mints these and is
/// the only party that can interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef(pub String);

impl FileRef {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

/// Whether a peer is a person, a basic group, or a broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    User,
    Group,
    Channel,
}

impl PeerKind {
    pub fn is_group_or_channel(self) -> bool {
        matches!(self, PeerKind::Group | PeerKind::Channel)
    }
}

/// One row from the dialog list.
#[derive(Debug, Clone)]
pub struct DialogInfo {
    pub id: ChannelId,
    pub title: String,
    pub kind: PeerKind,
    pub unread_count: u32,
    pub unread_mentions_count: u32,
    pub unread_reactions_count: u32,
    pub is_muted: bool,
    pub unread_mark: bool,
}

/// Service messages the runtime treats specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// "X joined Telegram" notification.
    ContactSignUp,
}

/// A message as the core sees it: text plus extracted media parts.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChannelId,
    pub sender_id: Option<ChannelId>,
    pub sender_name: Option<String>,
    /// Sent by the agent itself.
    pub outgoing: bool,
    /// The agent was mentioned or replied to.
    pub mentioned: bool,
    pub text: String,
    pub date: DateTime<Utc>,
    pub reply_to: Option<MessageId>,
    pub media: Vec<MediaItem>,
    pub has_unread_reactions: bool,
    pub service: Option<ServiceKind>,
}

impl ChatMessage {
    pub fn text_message(
        id: MessageId,
        chat_id: ChannelId,
        sender_id: ChannelId,
        text: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            chat_id,
            sender_id: Some(sender_id),
            sender_name: None,
            outgoing: false,
            mentioned: false,
            text: text.into(),
            date,
            reply_to: None,
            media: Vec::new(),
            has_unread_reactions: false,
            service: None,
        }
    }
}

/// Resolved peer details used for channel-details prompt sections and for
/// the block/unblock safety check.
#[derive(Debug, Clone, Default)]
pub struct EntityInfo {
    pub id: ChannelId,
    pub kind: Option<PeerKind>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub birthday: Option<String>,
    pub title: Option<String>,
    pub about: Option<String>,
    pub participants_count: Option<u32>,
    pub admins_count: Option<u32>,
    pub photo_description: Option<String>,
    pub is_premium: bool,
    pub can_send_messages: bool,
}

impl EntityInfo {
    pub fn is_group_or_channel(&self) -> bool {
        self.kind.is_some_and(PeerKind::is_group_or_channel)
    }

    pub fn display_name(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        let mut name = String::new();
        if let Some(first) = self.first_name.as_deref() {
            name.push_str(first);
        }
        if let Some(last) = self.last_name.as_deref() {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(last);
        }
        if name.is_empty() {
            if let Some(username) = self.username.as_deref() {
                return format!("@{username}");
            }
            return self.id.to_string();
        }
        name
    }
}

/// Typing indicator actions. `Cancel` bumps online presence without the
/// "typing…" bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingAction {
    Typing,
    Cancel,
}

/// Push events delivered by the transport's update stream.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    NewMessage(ChatMessage),
    PartnerTyping { user_id: ChannelId },
    /// A dialog changed out-of-band (e.g. marked unread); triggers a scan.
    DialogsChanged,
    Disconnected,
}

/// One sticker within a resolved set.
#[derive(Debug, Clone)]
pub struct StickerInfo {
    pub unique_id: String,
    /// Emoji/alt name the LLM addresses the sticker by.
    pub name: String,
    pub file_ref: FileRef,
    /// Premium stickers are silently rejected for non-premium accounts.
    pub premium: bool,
}

/// A resolved sticker set.
#[derive(Debug, Clone)]
pub struct StickerSetInfo {
    pub short_name: String,
    pub title: String,
    pub stickers: Vec<StickerInfo>,
}

/// Normalize peer ids arriving from LLM output or legacy records:
/// an integer, `"123"`, `"u123"`, or `"-100123"`.
pub fn normalize_peer_id(raw: &str) -> Option<ChannelId> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix('u').unwrap_or(trimmed);
    stripped.parse::<ChannelId>().ok()
}

/// Same, but from a JSON parameter value.
pub fn peer_id_from_value(value: &serde_json::Value) -> Option<ChannelId> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => normalize_peer_id(s),
        _ => None,
    }
}
