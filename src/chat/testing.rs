//! Recording transport double for scenario tests.

use super::traits::{ChatTransport, EventStream};
use super::types::{
    ChatEvent, ChatMessage, DialogInfo, EntityInfo, FileRef, StickerSetInfo, TypingAction,
};
use crate::error::ChatError;
use crate::media::MediaKind;
use crate::{ChannelId, MessageId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Everything the double was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    SendMessage {
        peer: ChannelId,
        text: String,
        reply_to: Option<MessageId>,
        markdown: bool,
    },
    SendFile {
        peer: ChannelId,
        file: FileRef,
        kind: MediaKind,
    },
    SetTyping {
        peer: ChannelId,
        action: TypingAction,
    },
    ReadAck {
        peer: ChannelId,
        clear_mentions: bool,
        clear_reactions: bool,
    },
    Block(ChannelId),
    Unblock(ChannelId),
    DeleteHistory {
        peer: ChannelId,
        revoke: bool,
    },
}

#[derive(Default)]
struct Script {
    dialogs: Vec<DialogInfo>,
    messages: HashMap<ChannelId, Vec<ChatMessage>>,
    entities: HashMap<ChannelId, EntityInfo>,
    muted: HashSet<ChannelId>,
    blocked: HashSet<ChannelId>,
    sticker_sets: HashMap<String, StickerSetInfo>,
    sticker_membership: HashMap<String, String>,
    downloads: HashMap<String, Vec<u8>>,
}

/// In-memory transport that answers from a scripted state and records
/// every side-effecting call for assertions.
pub struct RecordingTransport {
    self_id: ChannelId,
    premium: bool,
    connected: AtomicBool,
    next_message_id: AtomicI64,
    script: Mutex<Script>,
    calls: Mutex<Vec<TransportCall>>,
    event_senders: Mutex<Vec<mpsc::UnboundedSender<ChatEvent>>>,
}

impl RecordingTransport {
    pub fn new(self_id: ChannelId) -> Self {
        Self {
            self_id,
            premium: false,
            connected: AtomicBool::new(true),
            next_message_id: AtomicI64::new(1000),
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
            event_senders: Mutex::new(Vec::new()),
        }
    }

    pub fn with_premium(mut self) -> Self {
        self.premium = true;
        self
    }

    pub fn add_dialog(&self, dialog: DialogInfo) {
        self.script.lock().unwrap().dialogs.push(dialog);
    }

    /// Append a message to a conversation's scripted history.
    pub fn add_history(&self, message: ChatMessage) {
        let mut script = self.script.lock().unwrap();
        script.messages.entry(message.chat_id).or_default().push(message);
    }

    pub fn set_entity(&self, entity: EntityInfo) {
        self.script.lock().unwrap().entities.insert(entity.id, entity);
    }

    pub fn set_muted(&self, peer: ChannelId, muted: bool) {
        let mut script = self.script.lock().unwrap();
        if muted {
            script.muted.insert(peer);
        } else {
            script.muted.remove(&peer);
        }
    }

    pub fn add_sticker_set(&self, set: StickerSetInfo) {
        let mut script = self.script.lock().unwrap();
        for sticker in &set.stickers {
            script
                .sticker_membership
                .insert(sticker.file_ref.0.clone(), set.short_name.clone());
        }
        script.sticker_sets.insert(set.short_name.clone(), set);
    }

    pub fn add_download(&self, file: &FileRef, bytes: Vec<u8>) {
        self.script
            .lock()
            .unwrap()
            .downloads
            .insert(file.0.clone(), bytes);
    }

    /// Deliver a push event to every subscriber.
    pub fn emit(&self, event: ChatEvent) {
        let mut senders = self.event_senders.lock().unwrap();
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_texts(&self, peer: ChannelId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::SendMessage { peer: p, text, .. } if p == peer => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn typing_calls(&self, peer: ChannelId) -> Vec<TypingAction> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::SetTyping { peer: p, action } if p == peer => Some(action),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl ChatTransport for RecordingTransport {
    fn self_id(&self) -> ChannelId {
        self.self_id
    }

    fn self_username(&self) -> Option<String> {
        None
    }

    fn is_premium(&self) -> bool {
        self.premium
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, ChatError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_senders.lock().unwrap().push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn dialogs(&self) -> Result<Vec<DialogInfo>, ChatError> {
        Ok(self.script.lock().unwrap().dialogs.clone())
    }

    async fn recent_messages(
        &self,
        peer: ChannelId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let script = self.script.lock().unwrap();
        let mut messages = script.messages.get(&peer).cloned().unwrap_or_default();
        messages.sort_by_key(|m| std::cmp::Reverse(m.id));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn messages_by_id(
        &self,
        peer: ChannelId,
        ids: &[MessageId],
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let script = self.script.lock().unwrap();
        let messages = script.messages.get(&peer).cloned().unwrap_or_default();
        Ok(messages
            .into_iter()
            .filter(|m| ids.contains(&m.id))
            .collect())
    }

    async fn entity(&self, id: ChannelId) -> Result<EntityInfo, ChatError> {
        self.script
            .lock()
            .unwrap()
            .entities
            .get(&id)
            .cloned()
            .ok_or(ChatError::EntityNotFound { id })
    }

    async fn is_muted(&self, peer: ChannelId) -> Result<bool, ChatError> {
        Ok(self.script.lock().unwrap().muted.contains(&peer))
    }

    async fn send_message(
        &self,
        peer: ChannelId,
        text: &str,
        reply_to: Option<MessageId>,
        markdown: bool,
    ) -> Result<MessageId, ChatError> {
        self.record(TransportCall::SendMessage {
            peer,
            text: text.to_string(),
            reply_to,
            markdown,
        });
        Ok(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn send_file(
        &self,
        peer: ChannelId,
        file: &FileRef,
        kind: MediaKind,
        _reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        self.record(TransportCall::SendFile {
            peer,
            file: file.clone(),
            kind,
        });
        Ok(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn send_read_acknowledge(
        &self,
        peer: ChannelId,
        clear_mentions: bool,
        clear_reactions: bool,
    ) -> Result<(), ChatError> {
        self.record(TransportCall::ReadAck {
            peer,
            clear_mentions,
            clear_reactions,
        });
        Ok(())
    }

    async fn set_typing(&self, peer: ChannelId, action: TypingAction) -> Result<(), ChatError> {
        self.record(TransportCall::SetTyping { peer, action });
        Ok(())
    }

    async fn block(&self, peer: ChannelId) -> Result<(), ChatError> {
        self.script.lock().unwrap().blocked.insert(peer);
        self.record(TransportCall::Block(peer));
        Ok(())
    }

    async fn unblock(&self, peer: ChannelId) -> Result<(), ChatError> {
        self.script.lock().unwrap().blocked.remove(&peer);
        self.record(TransportCall::Unblock(peer));
        Ok(())
    }

    async fn blocked_peers(&self) -> Result<Vec<ChannelId>, ChatError> {
        Ok(self.script.lock().unwrap().blocked.iter().copied().collect())
    }

    async fn delete_history(&self, peer: ChannelId, revoke: bool) -> Result<(), ChatError> {
        self.record(TransportCall::DeleteHistory { peer, revoke });
        Ok(())
    }

    async fn download(&self, file: &FileRef) -> Result<Vec<u8>, ChatError> {
        self.script
            .lock()
            .unwrap()
            .downloads
            .get(&file.0)
            .cloned()
            .ok_or_else(|| ChatError::Request(format!("no scripted bytes for {}", file.0)))
    }

    async fn sticker_set(&self, short_name: &str) -> Result<StickerSetInfo, ChatError> {
        self.script
            .lock()
            .unwrap()
            .sticker_sets
            .get(short_name)
            .cloned()
            .ok_or_else(|| ChatError::Request(format!("unknown sticker set {short_name}")))
    }

    async fn sticker_set_of(&self, file: &FileRef) -> Result<Option<String>, ChatError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .sticker_membership
            .get(&file.0)
            .cloned())
    }
}
