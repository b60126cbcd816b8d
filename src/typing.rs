//! Process-wide typing-state tracker.
//!
//! Records when a conversation partner was last seen typing so that
//! `received` tasks in direct messages can hold off until the partner
//! pauses. Group chats bypass this gate entirely.

use crate::config::TYPING_TTL;
use crate::{AgentId, ChannelId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared map of `(agent, peer) -> last typing stamp`. Constructed once at
/// startup and handed to the agent runtimes and the tick loop.
#[derive(Clone, Default)]
pub struct TypingState {
    stamps: Arc<Mutex<HashMap<(AgentId, ChannelId), DateTime<Utc>>>>,
}

impl TypingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the partner is typing right now. The TTL is absolute:
    /// marking twice at the same instant does not extend the window.
    pub fn mark_partner_typing(&self, agent_id: AgentId, peer_id: ChannelId, now: DateTime<Utc>) {
        let mut stamps = self.stamps.lock().expect("typing state poisoned");
        stamps.insert((agent_id, peer_id), now);
        // Opportunistic prune so abandoned conversations do not accumulate.
        let ttl = chrono::Duration::from_std(TYPING_TTL).expect("ttl fits");
        stamps.retain(|_, stamp| now - *stamp <= ttl);
    }

    /// Whether the partner typed within the TTL window.
    pub fn is_partner_recently_typing(
        &self,
        agent_id: AgentId,
        peer_id: ChannelId,
        now: DateTime<Utc>,
    ) -> bool {
        self.remaining_window(agent_id, peer_id, now).is_some()
    }

    /// Time left until the typing window expires, if it is still open.
    pub fn remaining_window(
        &self,
        agent_id: AgentId,
        peer_id: ChannelId,
        now: DateTime<Utc>,
    ) -> Option<std::time::Duration> {
        let stamps = self.stamps.lock().expect("typing state poisoned");
        let stamp = stamps.get(&(agent_id, peer_id))?;
        let ttl = chrono::Duration::from_std(TYPING_TTL).expect("ttl fits");
        let elapsed = now - *stamp;
        if elapsed < chrono::Duration::zero() || elapsed >= ttl {
            return None;
        }
        (ttl - elapsed).to_std().ok()
    }
}
