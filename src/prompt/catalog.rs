//! Sticker and media catalogs advertised to the model.

use crate::media::source::{MediaLookup, MediaSource};
use crate::media::{MediaItem, MediaKind, MediaRecord};
use chrono::{DateTime, Utc};

/// One sticker the agent may send.
#[derive(Debug, Clone)]
pub struct CatalogSticker {
    pub set_name: String,
    pub name: String,
    pub unique_id: String,
    pub premium: bool,
}

/// Build the sticker catalog section. Premium stickers are filtered out
/// for non-premium accounts; the transport rejects them silently
/// otherwise. Descriptions come from the cache only.
pub async fn build_sticker_catalog(
    stickers: &[CatalogSticker],
    premium_allowed: bool,
    chain: &dyn MediaSource,
    now: DateTime<Utc>,
) -> Option<String> {
    let mut lines = Vec::new();
    for sticker in stickers {
        if sticker.premium && !premium_allowed {
            continue;
        }
        let mut item = MediaItem::new(MediaKind::Sticker, &sticker.unique_id);
        item.sticker_set_name = Some(sticker.set_name.clone());
        item.sticker_name = Some(sticker.name.clone());
        let description = chain
            .get(&MediaLookup::cached_only(&item, now))
            .await
            .as_ref()
            .and_then(MediaRecord::description_text)
            .map(str::to_string);
        match description {
            Some(description) => lines.push(format!(
                "- `{}` / `{}`: {description}",
                sticker.set_name, sticker.name
            )),
            None => lines.push(format!("- `{}` / `{}`", sticker.set_name, sticker.name)),
        }
    }
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "# Available Stickers\n\n\
         You can send these stickers with a `sticker` task naming the set and sticker.\n\n{}",
        lines.join("\n")
    ))
}

/// Build the catalog of sendable media cached from Saved Messages.
pub async fn build_media_catalog(
    items: &[MediaItem],
    chain: &dyn MediaSource,
    now: DateTime<Utc>,
) -> Option<String> {
    let mut lines = Vec::new();
    for item in items {
        if item.kind.is_sticker() {
            continue;
        }
        let description = chain
            .get(&MediaLookup::cached_only(item, now))
            .await
            .as_ref()
            .and_then(MediaRecord::description_text)
            .map(str::to_string);
        match description {
            Some(description) => {
                lines.push(format!("- `{}` ({}): {description}", item.unique_id, item.kind))
            }
            None => lines.push(format!("- `{}` ({})", item.unique_id, item.kind)),
        }
    }
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "# Available Media\n\n\
         You can send these with a `send_media` task naming the unique_id.\n\n{}",
        lines.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::source::DirectoryMediaSource;
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

    fn sticker(set: &str, name: &str, id: &str, premium: bool) -> CatalogSticker {
        CatalogSticker {
            set_name: set.into(),
            name: name.into(),
            unique_id: id.into(),
            premium,
        }
    }

    #[tokio::test]
    async fn premium_stickers_are_filtered_for_basic_accounts() {
        let cache = cache_with(&[]);
        let stickers = vec![
            sticker("SetA", "Wink", "s1", false),
            sticker("SetA", "Gold", "s2", true),
        ];
        let catalog = build_sticker_catalog(&stickers, false, cache.as_ref(), Utc::now())
            .await
            .unwrap();
        assert!(catalog.contains("Wink"));
        assert!(!catalog.contains("Gold"));

        let with_premium = build_sticker_catalog(&stickers, true, cache.as_ref(), Utc::now())
            .await
            .unwrap();
        assert!(with_premium.contains("Gold"));
    }

    #[tokio::test]
    async fn catalog_includes_cached_descriptions() {
        let cache = cache_with(&[("s1", "a winking dancer")]);
        let stickers = vec![sticker("SetA", "Wink", "s1", false)];
        let catalog = build_sticker_catalog(&stickers, false, cache.as_ref(), Utc::now())
            .await
            .unwrap();
        assert!(catalog.contains("a winking dancer"));
    }

    #[tokio::test]
    async fn empty_catalogs_are_omitted() {
        let cache = cache_with(&[]);
        assert!(build_sticker_catalog(&[], false, cache.as_ref(), Utc::now()).await.is_none());
        assert!(build_media_catalog(&[], cache.as_ref(), Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn media_catalog_lists_kind_and_description() {
        let cache = cache_with(&[("p1", "a mountain lake")]);
        let items = vec![MediaItem::new(MediaKind::Photo, "p1")];
        let catalog = build_media_catalog(&items, cache.as_ref(), Utc::now()).await.unwrap();
        assert!(catalog.contains("`p1` (photo): a mountain lake"));
    }
}
