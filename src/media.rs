//! Media description pipeline: types, per-tick budget, source chain,
//! message injection, and prompt sentence formatting.

pub mod budget;
pub mod format;
pub mod injector;
pub mod mime;
pub mod source;
pub mod types;

pub use budget::DescriptionBudget;
pub use injector::MediaContext;
pub use source::{
    AiGeneratingMediaSource, BudgetExhaustedMediaSource, CompositeMediaSource,
    DirectoryMediaSource, MediaLookup, MediaSource, UnsupportedFormatMediaSource, build_chain,
};
pub use types::{MediaItem, MediaKind, MediaRecord, MediaStatus};
