//! Prompt sentence formatting for media.
//!
//! Conventions: media mentions are prefixed with `⟦media⟧` and the body is
//! wrapped in single angle quotes `‹ … ›`. Stickers name their set and
//! sticker; audio uses "sounds like", everything else "appears as".

use super::types::{MediaKind, MediaRecord};

const ANGLE_OPEN: char = '‹';
const ANGLE_CLOSE: char = '›';

/// Clause beginning with "that …" for a description, with a generic
/// fallback when there is nothing usable.
fn description_clause(description: Option<&str>, kind: MediaKind) -> String {
    let text = description.map(str::trim).filter(|s| !s.is_empty());
    match text {
        Some(text) if kind == MediaKind::Audio => format!("that sounds like {text}"),
        Some(text) => format!("that appears as {text}"),
        None => "that is not understood".to_string(),
    }
}

/// `⟦media⟧ ‹the photo that appears as …›`
pub fn format_media_sentence(kind: MediaKind, record: Option<&MediaRecord>) -> String {
    let description = record.and_then(MediaRecord::description_text);
    if description.is_none() {
        if let Some(reason) = record
            .and_then(|r| r.failure_reason.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
        {
            return format!(
                "⟦media⟧ {ANGLE_OPEN}the {kind} could not be analyzed ({reason}){ANGLE_CLOSE}"
            );
        }
    }
    format!(
        "⟦media⟧ {ANGLE_OPEN}the {kind} {}{ANGLE_CLOSE}",
        description_clause(description, kind)
    )
}

/// `⟦media⟧ ‹the sticker `Wink` from the sticker set `WendyDancer` that appears as …›`
pub fn format_sticker_sentence(
    sticker_name: Option<&str>,
    sticker_set_name: Option<&str>,
    record: Option<&MediaRecord>,
) -> String {
    let name = sticker_name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(unnamed)");
    let set = sticker_set_name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(unknown)");
    let description = record.and_then(MediaRecord::description_text);
    format!(
        "⟦media⟧ {ANGLE_OPEN}the sticker `{name}` from the sticker set `{set}` {}{ANGLE_CLOSE}",
        description_clause(description, MediaKind::Sticker)
    )
}
