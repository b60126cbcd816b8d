//! Chat transport interface.
//!
//! The agent core consumes a narrow slice of a Telegram-like client. The
//! real SDK binding lives outside this crate; everything here is the
//! surface the core depends on, plus a recording double for tests.

pub mod traits;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use traits::{ChatTransport, TransportConnector};
pub use types::{
    ChatEvent, ChatMessage, DialogInfo, EntityInfo, FileRef, PeerKind, ServiceKind,
    StickerInfo, StickerSetInfo, TypingAction, normalize_peer_id, peer_id_from_value,
};
