//! System prompt assembly: prompt file loading, section builders, and
//! sticker/media catalogs.

pub mod builder;
pub mod catalog;
pub mod channel_details;
pub mod loader;

pub use builder::{PromptSections, SpecificSignals, build_specific_instructions, is_conversation_start};
pub use loader::PromptLoader;
