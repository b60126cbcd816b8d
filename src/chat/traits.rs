//! The transport trait the agent core is written against.

use super::types::{
    ChatEvent, ChatMessage, DialogInfo, EntityInfo, FileRef, StickerSetInfo, TypingAction,
};
use crate::error::ChatError;
use crate::media::MediaKind;
use crate::{ChannelId, MessageId};
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed stream of transport push events.
pub type EventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Minimal chat client surface the core consumes. One instance per
/// authenticated agent account.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Telegram user id of the authenticated account.
    fn self_id(&self) -> ChannelId;

    fn self_username(&self) -> Option<String>;

    /// Whether the account can send premium stickers.
    fn is_premium(&self) -> bool;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), ChatError>;

    /// Subscribe to push updates. Each call returns an independent stream.
    async fn subscribe(&self) -> Result<EventStream, ChatError>;

    async fn dialogs(&self) -> Result<Vec<DialogInfo>, ChatError>;

    /// Newest-first message history for a conversation.
    async fn recent_messages(
        &self,
        peer: ChannelId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn messages_by_id(
        &self,
        peer: ChannelId,
        ids: &[MessageId],
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn entity(&self, id: ChannelId) -> Result<EntityInfo, ChatError>;

    /// Per-peer notification mute state.
    async fn is_muted(&self, peer: ChannelId) -> Result<bool, ChatError>;

    async fn send_message(
        &self,
        peer: ChannelId,
        text: &str,
        reply_to: Option<MessageId>,
        markdown: bool,
    ) -> Result<MessageId, ChatError>;

    async fn send_file(
        &self,
        peer: ChannelId,
        file: &FileRef,
        kind: MediaKind,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError>;

    async fn send_read_acknowledge(
        &self,
        peer: ChannelId,
        clear_mentions: bool,
        clear_reactions: bool,
    ) -> Result<(), ChatError>;

    async fn set_typing(&self, peer: ChannelId, action: TypingAction) -> Result<(), ChatError>;

    async fn block(&self, peer: ChannelId) -> Result<(), ChatError>;

    async fn unblock(&self, peer: ChannelId) -> Result<(), ChatError>;

    /// Current blocklist, newest first.
    async fn blocked_peers(&self) -> Result<Vec<ChannelId>, ChatError>;

    /// DM-only conversation wipe; `revoke` deletes for both sides.
    async fn delete_history(&self, peer: ChannelId, revoke: bool) -> Result<(), ChatError>;

    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, ChatError>;

    /// Resolve a sticker set by short name, including its documents.
    async fn sticker_set(&self, short_name: &str) -> Result<StickerSetInfo, ChatError>;

    /// Resolve the set short name a sticker document belongs to.
    async fn sticker_set_of(&self, file: &FileRef) -> Result<Option<String>, ChatError>;
}

/// Builds connected transports from stored session material. The concrete
/// SDK binding implements this; the core only ever sees the trait.
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect and authorize using the session file for `agent_name`.
    /// Returns `ChatError::NotAuthorized` when no usable session exists;
    /// the runtime sleeps and retries, since the admin console can
    /// authenticate out-of-band.
    async fn connect(
        &self,
        agent_name: &str,
        phone: &str,
        sessions_dir: &Path,
    ) -> Result<Arc<dyn ChatTransport>, ChatError>;
}

/// Connector used when no SDK binding is wired in. Every connect attempt
/// reports an unauthorized session, which the runtime treats the same as
/// an agent that has not logged in yet.
pub struct UnconfiguredConnector;

#[async_trait::async_trait]
impl TransportConnector for UnconfiguredConnector {
    async fn connect(
        &self,
        agent_name: &str,
        _phone: &str,
        _sessions_dir: &Path,
    ) -> Result<Arc<dyn ChatTransport>, ChatError> {
        tracing::debug!(agent = %agent_name, "no transport binding configured");
        Err(ChatError::NotAuthorized)
    }
}
