//! Walks message history, ensures every media item has a description in
//! the cache, and renders messages into prompt text.

use super::format::{format_media_sentence, format_sticker_sentence};
use super::source::{MediaLookup, MediaSource};
use super::budget::DescriptionBudget;
use crate::chat::{ChatMessage, ChatTransport};
use crate::llm::LlmProvider;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Collaborators the injector threads through to the source chain.
pub struct MediaContext<'a> {
    pub chain: &'a dyn MediaSource,
    pub transport: Option<&'a dyn ChatTransport>,
    pub llm: Option<&'a dyn LlmProvider>,
    pub budget: Option<&'a DescriptionBudget>,
    pub now: DateTime<Utc>,
}

/// Process media in messages through the source chain so descriptions are
/// cached before prompt assembly. Messages arrive newest first, which
/// prioritizes recent media for the per-tick budget.
///
/// Sticker items missing their set name are resolved through the
/// transport first; the resolved name is written back into the item so
/// the prompt formatter sees it.
pub async fn inject_media_descriptions(messages: &mut [ChatMessage], ctx: &MediaContext<'_>) {
    for message in messages.iter_mut() {
        for item in message.media.iter_mut() {
            if item.file_ref.is_none() {
                debug!(unique_id = %item.unique_id, "media item has no file reference");
                continue;
            }

            if item.kind.is_sticker() && item.sticker_set_name.is_none() {
                if let (Some(transport), Some(file_ref)) = (ctx.transport, item.file_ref.as_ref())
                {
                    match transport.sticker_set_of(file_ref).await {
                        Ok(resolved) => item.sticker_set_name = resolved,
                        Err(error) => {
                            debug!(unique_id = %item.unique_id, %error, "sticker set resolution failed");
                        }
                    }
                }
            }

            let record = ctx
                .chain
                .get(&MediaLookup {
                    item,
                    transport: ctx.transport,
                    llm: ctx.llm,
                    budget: ctx.budget,
                    now: ctx.now,
                })
                .await;
            match record {
                Some(record) => debug!(
                    unique_id = %item.unique_id,
                    status = record.status.as_str(),
                    "media processed"
                ),
                None => debug!(unique_id = %item.unique_id, "no media source answered"),
            }
        }
    }
}

/// Render one message for the prompt: its text plus a `⟦media⟧` sentence
/// per attachment. Reads cached descriptions only; never downloads and
/// never calls the model.
pub async fn format_message_for_prompt(
    message: &ChatMessage,
    chain: &dyn MediaSource,
    now: DateTime<Utc>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    let text = message.text.trim();
    if !text.is_empty() {
        parts.push(text.to_string());
    }

    for item in &message.media {
        let record = chain.get(&MediaLookup::cached_only(item, now)).await;
        if item.kind.is_sticker() {
            parts.push(format_sticker_sentence(
                item.sticker_name.as_deref(),
                item.sticker_set_name.as_deref(),
                record.as_ref(),
            ));
        } else {
            parts.push(format_media_sentence(item.kind, record.as_ref()));
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::FileRef;
    use crate::media::source::DirectoryMediaSource;
    use crate::media::{MediaItem, MediaKind, MediaRecord};
    use std::sync::Arc;

    fn cache_with(records: &[(&str, &str)]) -> Arc<DirectoryMediaSource> {
        let cache = Arc::new(DirectoryMediaSource::new(std::path::PathBuf::from(
            "/nonexistent-for-test",
        )));
        for (id, desc) in records {
            cache.insert(id, MediaRecord::ok(id, *desc, Utc::now()));
        }
        cache
    }

    #[tokio::test]
    async fn formats_text_and_media_parts() {
        let cache = cache_with(&[("p1", "a mountain lake")]);
        let mut message = ChatMessage::text_message(1, 2, 3, "look at this", Utc::now());
        message
            .media
            .push(MediaItem::new(MediaKind::Photo, "p1").with_file_ref(FileRef::new("f")));

        let rendered = format_message_for_prompt(&message, cache.as_ref(), Utc::now()).await;
        assert_eq!(
            rendered,
            "look at this ⟦media⟧ ‹the photo that appears as a mountain lake›"
        );
    }

    #[tokio::test]
    async fn uncached_media_renders_fallback() {
        let cache = cache_with(&[]);
        let mut message = ChatMessage::text_message(1, 2, 3, "", Utc::now());
        message.media.push(MediaItem::new(MediaKind::Gif, "g1"));

        let rendered = format_message_for_prompt(&message, cache.as_ref(), Utc::now()).await;
        assert_eq!(rendered, "⟦media⟧ ‹the gif that is not understood›");
    }

    #[tokio::test]
    async fn injector_resolves_sticker_sets_through_transport() {
        use crate::chat::testing::RecordingTransport;
        use crate::chat::{StickerInfo, StickerSetInfo};

        let transport = RecordingTransport::new(1);
        transport.add_sticker_set(StickerSetInfo {
            short_name: "WendyDancer".into(),
            title: "Wendy".into(),
            stickers: vec![StickerInfo {
                unique_id: "s1".into(),
                name: "Wink".into(),
                file_ref: FileRef::new("sticker-file"),
                premium: false,
            }],
        });

        let cache = cache_with(&[("s1", "a winking dancer")]);
        let mut message = ChatMessage::text_message(1, 2, 3, "", Utc::now());
        let mut item = MediaItem::new(MediaKind::Sticker, "s1")
            .with_file_ref(FileRef::new("sticker-file"));
        item.sticker_name = Some("Wink".into());
        message.media.push(item);

        let mut messages = vec![message];
        inject_media_descriptions(
            &mut messages,
            &MediaContext {
                chain: cache.as_ref(),
                transport: Some(&transport),
                llm: None,
                budget: None,
                now: Utc::now(),
            },
        )
        .await;

        assert_eq!(
            messages[0].media[0].sticker_set_name.as_deref(),
            Some("WendyDancer")
        );
    }
}
