//! Layered media description sources.
//!
//! Lookup walks a chain: curated directories, the persistent AI cache, an
//! unsupported-format gate, the per-tick budget gate, and finally the AI
//! generator. Earlier sources win; the first non-None record is returned.

use super::budget::DescriptionBudget;
use super::mime::{extension_for_mime, sniff_mime};
use super::types::{MediaItem, MediaRecord, MediaStatus};
use crate::chat::ChatTransport;
use crate::config::DESCRIBE_TIMEOUT;
use crate::error::LlmError;
use crate::llm::LlmProvider;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Sticker set whose sticker names are their own descriptions; no LLM call
/// is spent on them.
const ANIMATED_EMOJIES_SET: &str = "AnimatedEmojies";

/// One lookup through the chain: the item plus the collaborators the
/// generating tail of the chain needs.
pub struct MediaLookup<'a> {
    pub item: &'a MediaItem,
    pub transport: Option<&'a dyn ChatTransport>,
    pub llm: Option<&'a dyn LlmProvider>,
    pub budget: Option<&'a DescriptionBudget>,
    pub now: DateTime<Utc>,
}

impl<'a> MediaLookup<'a> {
    /// Metadata-only lookup that can hit caches but never generates.
    pub fn cached_only(item: &'a MediaItem, now: DateTime<Utc>) -> Self {
        Self {
            item,
            transport: None,
            llm: None,
            budget: None,
            now,
        }
    }
}

/// A provider of media description records.
#[async_trait::async_trait]
pub trait MediaSource: Send + Sync {
    async fn get(&self, lookup: &MediaLookup<'_>) -> Option<MediaRecord>;
}

/// Wraps a directory of `<unique_id>.json` records, loaded eagerly into
/// memory at construction. Lookups never touch disk again.
pub struct DirectoryMediaSource {
    directory: PathBuf,
    cache: Mutex<HashMap<String, MediaRecord>>,
}

impl DirectoryMediaSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let mut cache = HashMap::new();
        if directory.is_dir() {
            if let Ok(entries) = std::fs::read_dir(&directory) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let Some(unique_id) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    match std::fs::read_to_string(&path)
                        .map_err(|e| e.to_string())
                        .and_then(|text| {
                            serde_json::from_str::<MediaRecord>(&text).map_err(|e| e.to_string())
                        }) {
                        Ok(record) => {
                            cache.insert(unique_id.to_string(), record);
                        }
                        Err(error) => {
                            warn!(path = %path.display(), %error, "skipping bad media record");
                        }
                    }
                }
            }
        }
        debug!(
            directory = %directory.display(),
            entries = cache.len(),
            "loaded media directory"
        );
        Self {
            directory,
            cache: Mutex::new(cache),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Lookup by id without the async chain machinery.
    pub fn lookup(&self, unique_id: &str) -> Option<MediaRecord> {
        self.cache.lock().expect("media cache poisoned").get(unique_id).cloned()
    }

    /// Update the in-memory view in lockstep with a disk write so a
    /// subsequent lookup never re-reads disk.
    pub fn insert(&self, unique_id: &str, record: MediaRecord) {
        self.cache
            .lock()
            .expect("media cache poisoned")
            .insert(unique_id.to_string(), record);
    }
}

#[async_trait::async_trait]
impl MediaSource for DirectoryMediaSource {
    async fn get(&self, lookup: &MediaLookup<'_>) -> Option<MediaRecord> {
        self.lookup(&lookup.item.unique_id)
    }
}

/// Checks each source in order and returns the first hit.
pub struct CompositeMediaSource {
    sources: Vec<Arc<dyn MediaSource>>,
}

impl CompositeMediaSource {
    pub fn new(sources: Vec<Arc<dyn MediaSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait::async_trait]
impl MediaSource for CompositeMediaSource {
    async fn get(&self, lookup: &MediaLookup<'_>) -> Option<MediaRecord> {
        for source in &self.sources {
            if let Some(record) = source.get(lookup).await {
                return Some(record);
            }
        }
        None
    }
}

/// Rejects formats the LLM cannot ingest before any budget is spent.
pub struct UnsupportedFormatMediaSource;

#[async_trait::async_trait]
impl MediaSource for UnsupportedFormatMediaSource {
    async fn get(&self, lookup: &MediaLookup<'_>) -> Option<MediaRecord> {
        let mime = lookup.item.mime.as_deref()?;
        let llm = lookup.llm?;
        if llm.is_mime_type_supported(mime) {
            return None;
        }
        let mut record = MediaRecord::failure(
            &lookup.item.unique_id,
            MediaStatus::UnsupportedFormat,
            Some(format!("MIME type {mime} not supported by the model")),
            lookup.now,
        )
        .with_item_metadata(lookup.item);
        record.mime_type = Some(mime.to_string());
        Some(record)
    }
}

/// Consumes one budget unit, or terminates the chain with a
/// `budget_exhausted` record when none is left.
pub struct BudgetExhaustedMediaSource;

#[async_trait::async_trait]
impl MediaSource for BudgetExhaustedMediaSource {
    async fn get(&self, lookup: &MediaLookup<'_>) -> Option<MediaRecord> {
        let budget = lookup.budget?;
        if budget.try_consume() {
            // Let the generating source run.
            return None;
        }
        Some(
            MediaRecord::failure(
                &lookup.item.unique_id,
                MediaStatus::BudgetExhausted,
                None,
                lookup.now,
            )
            .with_item_metadata(lookup.item),
        )
    }
}

/// Downloads the blob, asks the model for a description, and caches the
/// outcome. Always returns a record; transient failures are not cached.
pub struct AiGeneratingMediaSource {
    cache_directory: PathBuf,
    cache: Arc<DirectoryMediaSource>,
}

impl AiGeneratingMediaSource {
    pub fn new(cache_directory: impl Into<PathBuf>, cache: Arc<DirectoryMediaSource>) -> Self {
        let cache_directory = cache_directory.into();
        if let Err(error) = std::fs::create_dir_all(&cache_directory) {
            warn!(%error, "could not create media cache directory");
        }
        Self {
            cache_directory,
            cache,
        }
    }

    fn write_record(&self, unique_id: &str, record: &MediaRecord) {
        let path = self.cache_directory.join(format!("{unique_id}.json"));
        let tmp = self.cache_directory.join(format!("{unique_id}.json.tmp"));
        let text = match serde_json::to_string_pretty(record) {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, unique_id, "media record did not serialize");
                return;
            }
        };
        let result = std::fs::write(&tmp, text).and_then(|_| std::fs::rename(&tmp, &path));
        match result {
            Ok(()) => self.cache.insert(unique_id, record.clone()),
            Err(error) => warn!(%error, unique_id, "failed to cache media record"),
        }
    }

    fn write_blob(&self, unique_id: &str, mime: &str, data: &[u8]) {
        let path = self
            .cache_directory
            .join(format!("{unique_id}{}", extension_for_mime(mime)));
        if let Err(error) = std::fs::write(&path, data) {
            debug!(%error, unique_id, "failed to save media blob");
        }
    }
}

#[async_trait::async_trait]
impl MediaSource for AiGeneratingMediaSource {
    async fn get(&self, lookup: &MediaLookup<'_>) -> Option<MediaRecord> {
        let item = lookup.item;
        let unique_id = item.unique_id.as_str();

        // Sticker names in the well-known emoji set are their own
        // descriptions; not cached, not billed against the model.
        if item.sticker_set_name.as_deref() == Some(ANIMATED_EMOJIES_SET) {
            if let Some(name) = item.sticker_name.as_deref().filter(|n| !n.is_empty()) {
                return Some(
                    MediaRecord::ok(unique_id, name, lookup.now).with_item_metadata(item),
                );
            }
        }

        let (Some(transport), Some(llm)) = (lookup.transport, lookup.llm) else {
            return Some(
                MediaRecord::failure(
                    unique_id,
                    MediaStatus::Error,
                    Some("no transport or model available".into()),
                    lookup.now,
                )
                .with_item_metadata(item),
            );
        };
        let Some(file_ref) = item.file_ref.as_ref() else {
            return Some(
                MediaRecord::failure(
                    unique_id,
                    MediaStatus::Error,
                    Some("no downloadable file reference".into()),
                    lookup.now,
                )
                .with_item_metadata(item),
            );
        };

        let data = match transport.download(file_ref).await {
            Ok(data) => data,
            Err(error) => {
                debug!(unique_id, %error, "media download failed");
                // Transient: do not cache, let a later tick retry.
                return Some(
                    MediaRecord::failure(
                        unique_id,
                        MediaStatus::Error,
                        Some(format!("download failed: {error}")),
                        lookup.now,
                    )
                    .with_item_metadata(item)
                    .with_retryable(),
                );
            }
        };

        let mime = sniff_mime(&data);
        self.write_blob(unique_id, mime, &data);

        match llm.describe_image(&data, mime, DESCRIBE_TIMEOUT).await {
            Ok(description) => {
                let description = description.trim().to_string();
                let mut record = if description.is_empty() {
                    MediaRecord::failure(
                        unique_id,
                        MediaStatus::NotUnderstood,
                        Some("model returned an empty description".into()),
                        lookup.now,
                    )
                } else {
                    MediaRecord::ok(unique_id, description, lookup.now)
                }
                .with_item_metadata(item);
                record.mime_type = Some(mime.to_string());
                self.write_record(unique_id, &record);
                Some(record)
            }
            Err(LlmError::Timeout { seconds }) => {
                // Transient: surfaced but not cached.
                Some(
                    MediaRecord::failure(
                        unique_id,
                        MediaStatus::Timeout,
                        Some(format!("timeout after {seconds}s")),
                        lookup.now,
                    )
                    .with_item_metadata(item)
                    .with_retryable(),
                )
            }
            Err(error) => {
                let mut record = MediaRecord::failure(
                    unique_id,
                    MediaStatus::Error,
                    Some(format!("description failed: {error}")),
                    lookup.now,
                )
                .with_item_metadata(item);
                record.mime_type = Some(mime.to_string());
                self.write_record(unique_id, &record);
                Some(record)
            }
        }
    }
}

/// Assemble the standard chain over a cache directory, with optional
/// curated directories in front.
pub fn build_chain(
    curated_dirs: &[PathBuf],
    cache_dir: &Path,
) -> (Arc<CompositeMediaSource>, Arc<DirectoryMediaSource>) {
    let mut sources: Vec<Arc<dyn MediaSource>> = Vec::new();
    for dir in curated_dirs {
        if dir.is_dir() {
            sources.push(Arc::new(DirectoryMediaSource::new(dir.clone())));
        }
    }
    let cache = Arc::new(DirectoryMediaSource::new(cache_dir.to_path_buf()));
    sources.push(cache.clone());
    sources.push(Arc::new(UnsupportedFormatMediaSource));
    sources.push(Arc::new(BudgetExhaustedMediaSource));
    sources.push(Arc::new(AiGeneratingMediaSource::new(
        cache_dir.to_path_buf(),
        cache.clone(),
    )));
    (Arc::new(CompositeMediaSource::new(sources)), cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::RecordingTransport;
    use crate::chat::FileRef;
    use crate::media::MediaKind;
    use chrono::Utc;
    use std::time::Duration;

    /// Provider double: scripted description replies, counting calls.
    struct ScriptedLlm {
        reply: Result<String, &'static str>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedLlm {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: Default::default(),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn prompt_name(&self) -> &str {
            "Gemini"
        }

        async fn query_structured(
            &self,
            _system_prompt: &str,
            _now_iso: &str,
            _chat_type: &str,
            _history: &[crate::llm::ChatTurn],
            _allowed_task_kinds: &[String],
        ) -> Result<String, LlmError> {
            Err(LlmError::Empty)
        }

        async fn query_with_json_schema(
            &self,
            _system_prompt: &str,
            _schema: &serde_json::Value,
            _timeout: Option<Duration>,
        ) -> Result<String, LlmError> {
            Err(LlmError::Empty)
        }

        async fn describe_image(
            &self,
            _data: &[u8],
            _mime: &str,
            _timeout: Duration,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(msg) => Err(LlmError::Http((*msg).to_string())),
            }
        }

        fn is_mime_type_supported(&self, mime: &str) -> bool {
            mime.starts_with("image/")
        }
    }

    fn item_with_file(unique_id: &str, token: &str) -> MediaItem {
        MediaItem::new(MediaKind::Photo, unique_id).with_file_ref(FileRef::new(token))
    }

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\nrest-of-file";

    #[tokio::test]
    async fn generation_caches_to_disk_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, cache) = build_chain(&[], dir.path());
        let transport = RecordingTransport::new(1);
        let llm = ScriptedLlm::ok("a lighthouse at dusk");
        let budget = DescriptionBudget::new();
        budget.reset(8);

        let item = item_with_file("u1", "file-1");
        transport.add_download(&FileRef::new("file-1"), PNG_HEADER.to_vec());

        let record = chain
            .get(&MediaLookup {
                item: &item,
                transport: Some(&transport),
                llm: Some(&llm),
                budget: Some(&budget),
                now: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(record.status, MediaStatus::Ok);
        assert_eq!(record.description_text(), Some("a lighthouse at dusk"));

        // Disk record exists and the in-memory cache serves the next hit
        // without another model call or budget unit.
        assert!(dir.path().join("u1.json").exists());
        let before = budget.remaining();
        let again = chain
            .get(&MediaLookup {
                item: &item,
                transport: Some(&transport),
                llm: Some(&llm),
                budget: Some(&budget),
                now: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(again.description_text(), Some("a lighthouse at dusk"));
        assert_eq!(llm.call_count(), 1);
        assert_eq!(budget.remaining(), before);
    }

    #[tokio::test]
    async fn budget_exhaustion_stops_generation() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, _cache) = build_chain(&[], dir.path());
        let transport = RecordingTransport::new(1);
        let llm = ScriptedLlm::ok("described");
        let budget = DescriptionBudget::new();
        budget.reset(1);

        let first = item_with_file("u1", "f1");
        let second = item_with_file("u2", "f2");
        transport.add_download(&FileRef::new("f1"), PNG_HEADER.to_vec());
        transport.add_download(&FileRef::new("f2"), PNG_HEADER.to_vec());

        let now = Utc::now();
        let r1 = chain
            .get(&MediaLookup {
                item: &first,
                transport: Some(&transport),
                llm: Some(&llm),
                budget: Some(&budget),
                now,
            })
            .await
            .unwrap();
        let r2 = chain
            .get(&MediaLookup {
                item: &second,
                transport: Some(&transport),
                llm: Some(&llm),
                budget: Some(&budget),
                now,
            })
            .await
            .unwrap();

        assert_eq!(r1.status, MediaStatus::Ok);
        assert_eq!(r2.status, MediaStatus::BudgetExhausted);
        assert!(r2.description.is_none());
        assert_eq!(llm.call_count(), 1);
        assert_eq!(budget.remaining(), 0);
        // Budget records are not cached: the next tick can retry.
        assert!(!dir.path().join("u2.json").exists());
    }

    #[tokio::test]
    async fn unsupported_format_precedes_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, _cache) = build_chain(&[], dir.path());
        let transport = RecordingTransport::new(1);
        let llm = ScriptedLlm::ok("never called");
        let budget = DescriptionBudget::new();
        budget.reset(1);

        let item = MediaItem::new(MediaKind::Document, "doc1")
            .with_file_ref(FileRef::new("f1"))
            .with_mime("application/zip");

        let record = chain
            .get(&MediaLookup {
                item: &item,
                transport: Some(&transport),
                llm: Some(&llm),
                budget: Some(&budget),
                now: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(record.status, MediaStatus::UnsupportedFormat);
        assert_eq!(record.mime_type.as_deref(), Some("application/zip"));
        // The gate sits before the budget, which stays untouched.
        assert_eq!(budget.remaining(), 1);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn curated_directory_wins_over_generation() {
        let dir = tempfile::tempdir().unwrap();
        let curated = tempfile::tempdir().unwrap();
        let record = MediaRecord::ok("u1", "hand-written description", Utc::now());
        std::fs::write(
            curated.path().join("u1.json"),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        let (chain, _cache) = build_chain(&[curated.path().to_path_buf()], dir.path());
        let llm = ScriptedLlm::ok("machine description");
        let budget = DescriptionBudget::new();
        budget.reset(1);
        let item = item_with_file("u1", "f1");

        let found = chain
            .get(&MediaLookup {
                item: &item,
                transport: None,
                llm: Some(&llm),
                budget: Some(&budget),
                now: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(found.description_text(), Some("hand-written description"));
        assert_eq!(llm.call_count(), 0);
        assert_eq!(budget.remaining(), 1);
    }

    #[tokio::test]
    async fn animated_emojies_use_sticker_name() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, _cache) = build_chain(&[], dir.path());
        let llm = ScriptedLlm::ok("unused");
        let budget = DescriptionBudget::new();
        budget.reset(8);

        let mut item = MediaItem::new(MediaKind::Sticker, "emoji1");
        item.sticker_set_name = Some("AnimatedEmojies".into());
        item.sticker_name = Some("🎉".into());

        let record = chain
            .get(&MediaLookup {
                item: &item,
                transport: None,
                llm: Some(&llm),
                budget: Some(&budget),
                now: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(record.description_text(), Some("🎉"));
        assert_eq!(llm.call_count(), 0);
        // Name-derived records are not persisted.
        assert!(!dir.path().join("emoji1.json").exists());
    }

    #[tokio::test]
    async fn provider_error_is_cached_as_error_record() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, _cache) = build_chain(&[], dir.path());
        let transport = RecordingTransport::new(1);
        let llm = ScriptedLlm {
            reply: Err("boom"),
            calls: Default::default(),
        };
        let budget = DescriptionBudget::new();
        budget.reset(8);
        let item = item_with_file("u1", "f1");
        transport.add_download(&FileRef::new("f1"), PNG_HEADER.to_vec());

        let record = chain
            .get(&MediaLookup {
                item: &item,
                transport: Some(&transport),
                llm: Some(&llm),
                budget: Some(&budget),
                now: Utc::now(),
            })
            .await
            .unwrap();
        // A hard provider error is cached as a permanent error record.
        assert_eq!(record.status, MediaStatus::Error);
        assert!(dir.path().join("u1.json").exists());
    }
}
