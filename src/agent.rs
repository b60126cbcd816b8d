//! Persona agents: definitions, runtime caches, and the registry.

pub mod incoming;
pub mod runtime;
pub mod scan;

use crate::chat::{ChatTransport, EntityInfo, FileRef, TransportConnector};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::llm::LlmProvider;
use crate::media::source::{CompositeMediaSource, MediaSource};
use crate::media::{DescriptionBudget, MediaItem};
use crate::prompt::PromptLoader;
use crate::prompt::catalog::CatalogSticker;
use crate::storage::Storage;
use crate::tasks::SharedWorkQueue;
use crate::typing::TypingState;
use crate::{AgentId, ChannelId};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Blocklist cache lifetime.
const BLOCKLIST_TTL: Duration = Duration::from_secs(60);

/// A persona definition file (`agents/<name>.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub llm_name: Option<String>,
    #[serde(default)]
    pub role_prompts: Vec<String>,
    pub instructions: String,
    #[serde(default)]
    pub sticker_set_names: Vec<String>,
    #[serde(default)]
    pub explicit_stickers: Vec<(String, String)>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub daily_schedule_description: Option<String>,
    #[serde(default)]
    pub reset_on_first_message: bool,
    #[serde(default)]
    pub clear_summaries_on_first_message: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl AgentDefinition {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::AgentDefinition {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let definition: AgentDefinition =
            toml::from_str(&text).map_err(|e| ConfigError::AgentDefinition {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if definition.name.trim().is_empty() {
            return Err(ConfigError::AgentDefinition {
                path: path.display().to_string(),
                message: "agent name is empty".into(),
            }
            .into());
        }
        if definition.phone.trim().is_empty() {
            return Err(ConfigError::AgentDefinition {
                path: path.display().to_string(),
                message: "agent phone is empty".into(),
            }
            .into());
        }
        // "media" collides with the state directory layout.
        if definition.name.eq_ignore_ascii_case("media") {
            return Err(ConfigError::AgentDefinition {
                path: path.display().to_string(),
                message: "agent name 'media' is reserved".into(),
            }
            .into());
        }
        Ok(definition)
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.timezone
            .as_deref()
            .and_then(|tz| tz.parse().ok())
            .unwrap_or(chrono_tz::UTC)
    }
}

/// One sticker the agent can send, cached by `(set, name)`.
#[derive(Debug, Clone)]
pub struct CachedSticker {
    pub unique_id: String,
    pub file_ref: FileRef,
    pub premium: bool,
}

/// A running persona: definition plus transport handle and caches. All
/// fields are interior-mutable so the runtime, tick loop, and admin
/// console can share one `Arc<Agent>`.
pub struct Agent {
    pub definition: AgentDefinition,
    pub llm: Arc<dyn LlmProvider>,

    transport: RwLock<Option<Arc<dyn ChatTransport>>>,
    agent_id: AtomicI64,
    disabled: AtomicBool,

    stickers: Mutex<HashMap<(String, String), CachedSticker>>,
    saved_media: Mutex<HashMap<String, MediaItem>>,
    entity_cache: moka::future::Cache<ChannelId, EntityInfo>,
    mute_cache: moka::future::Cache<ChannelId, bool>,
    blocklist: Mutex<Option<(HashSet<ChannelId>, DateTime<Utc>)>>,
    system_prompt: Mutex<Option<String>>,
    media_chain: Arc<dyn MediaSource>,
}

impl Agent {
    pub fn new(
        definition: AgentDefinition,
        llm: Arc<dyn LlmProvider>,
        config: &Config,
        shared_chain: Arc<dyn MediaSource>,
    ) -> Self {
        // Agent-specific curated directories take priority over the
        // shared chain.
        let mut sources: Vec<Arc<dyn MediaSource>> = Vec::new();
        for dir in &config.config_dirs {
            let agent_media = dir.join("agents").join(&definition.name).join("media");
            if agent_media.is_dir() {
                sources.push(Arc::new(crate::media::DirectoryMediaSource::new(agent_media)));
            }
        }
        sources.push(shared_chain);
        let media_chain: Arc<dyn MediaSource> = Arc::new(CompositeMediaSource::new(sources));

        Self {
            disabled: AtomicBool::new(definition.disabled),
            definition,
            llm,
            transport: RwLock::new(None),
            agent_id: AtomicI64::new(0),
            stickers: Mutex::new(HashMap::new()),
            saved_media: Mutex::new(HashMap::new()),
            entity_cache: moka::future::Cache::builder()
                .time_to_live(Duration::from_secs(300))
                .build(),
            mute_cache: moka::future::Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .build(),
            blocklist: Mutex::new(None),
            system_prompt: Mutex::new(None),
            media_chain,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    /// Telegram id once authenticated; None before first connect.
    pub fn agent_id(&self) -> Option<AgentId> {
        match self.agent_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn transport(&self) -> Option<Arc<dyn ChatTransport>> {
        self.transport.read().expect("transport lock poisoned").clone()
    }

    pub fn set_transport(&self, transport: Arc<dyn ChatTransport>) {
        self.agent_id.store(transport.self_id(), Ordering::Relaxed);
        *self.transport.write().expect("transport lock poisoned") = Some(transport);
    }

    /// Drop the transport and every cache derived from it.
    pub fn clear_transport_and_caches(&self) {
        *self.transport.write().expect("transport lock poisoned") = None;
        self.stickers.lock().expect("sticker cache poisoned").clear();
        self.saved_media.lock().expect("media cache poisoned").clear();
        self.entity_cache.invalidate_all();
        self.mute_cache.invalidate_all();
        *self.blocklist.lock().expect("blocklist poisoned") = None;
    }

    pub fn clear_entity_cache(&self) {
        self.entity_cache.invalidate_all();
    }

    pub fn media_chain(&self) -> &dyn MediaSource {
        self.media_chain.as_ref()
    }

    /// Resolve an entity through the 5-minute cache.
    pub async fn entity(&self, id: ChannelId) -> Option<EntityInfo> {
        if let Some(hit) = self.entity_cache.get(&id).await {
            return Some(hit);
        }
        let transport = self.transport()?;
        match transport.entity(id).await {
            Ok(entity) => {
                self.entity_cache.insert(id, entity.clone()).await;
                Some(entity)
            }
            Err(error) => {
                tracing::debug!(agent = %self.name(), id, %error, "entity resolution failed");
                None
            }
        }
    }

    /// Per-chat mute state through the 60-second cache. Errors read as
    /// not muted.
    pub async fn is_muted(&self, peer: ChannelId) -> bool {
        if let Some(hit) = self.mute_cache.get(&peer).await {
            return hit;
        }
        let Some(transport) = self.transport() else {
            return false;
        };
        let muted = transport.is_muted(peer).await.unwrap_or(false);
        self.mute_cache.insert(peer, muted).await;
        muted
    }

    /// Whether the user is in the agent's blocklist, via a short-lived
    /// cached copy of the list.
    pub async fn is_blocked(&self, user_id: ChannelId, now: DateTime<Utc>) -> bool {
        {
            let cached = self.blocklist.lock().expect("blocklist poisoned");
            if let Some((list, fetched)) = cached.as_ref() {
                if now - *fetched
                    < chrono::Duration::from_std(BLOCKLIST_TTL).expect("ttl fits")
                {
                    return list.contains(&user_id);
                }
            }
        }
        let Some(transport) = self.transport() else {
            return false;
        };
        let list: HashSet<ChannelId> = match transport.blocked_peers().await {
            Ok(peers) => peers.into_iter().collect(),
            Err(error) => {
                warn!(agent = %self.name(), %error, "failed to refresh blocklist");
                HashSet::new()
            }
        };
        let contains = list.contains(&user_id);
        *self.blocklist.lock().expect("blocklist poisoned") = Some((list, now));
        contains
    }

    /// The static middle of the system prompt: provider instructions, the
    /// agent's own instructions, then role prompts in declared order.
    /// `Task-Schedule` is excluded here; the planning turn appends it only
    /// when the schedule resource is actually in context.
    pub fn system_prompt(&self, prompts: &PromptLoader) -> Result<String> {
        if let Some(cached) = self.system_prompt.lock().expect("prompt cache poisoned").as_ref() {
            return Ok(cached.clone());
        }
        let mut parts = vec![
            prompts.load(self.llm.prompt_name())?,
            self.definition.instructions.clone(),
        ];
        for role in &self.definition.role_prompts {
            if role == "Task-Schedule" {
                continue;
            }
            parts.push(prompts.load_for_agent(role, Some(self.name()))?);
        }
        let assembled = parts.join("\n\n");
        *self.system_prompt.lock().expect("prompt cache poisoned") = Some(assembled.clone());
        Ok(assembled)
    }

    /// Whether a role prompt is declared for this agent.
    pub fn has_role_prompt(&self, name: &str) -> bool {
        self.definition.role_prompts.iter().any(|role| role == name)
    }

    // ----- sticker and saved-media caches -----

    pub fn sticker_file(&self, set: &str, name: &str) -> Option<CachedSticker> {
        self.stickers
            .lock()
            .expect("sticker cache poisoned")
            .get(&(set.to_string(), name.to_string()))
            .cloned()
    }

    /// First configured set, used when the model names a sticker without
    /// a set.
    pub fn canonical_sticker_set(&self) -> Option<&str> {
        self.definition.sticker_set_names.first().map(String::as_str)
    }

    pub fn catalog_stickers(&self) -> Vec<CatalogSticker> {
        let stickers = self.stickers.lock().expect("sticker cache poisoned");
        let mut catalog: Vec<CatalogSticker> = stickers
            .iter()
            .map(|((set, name), cached)| CatalogSticker {
                set_name: set.clone(),
                name: name.clone(),
                unique_id: cached.unique_id.clone(),
                premium: cached.premium,
            })
            .collect();
        catalog.sort_by(|a, b| (&a.set_name, &a.name).cmp(&(&b.set_name, &b.name)));
        catalog
    }

    pub fn saved_media_item(&self, unique_id: &str) -> Option<MediaItem> {
        self.saved_media
            .lock()
            .expect("media cache poisoned")
            .get(unique_id)
            .cloned()
    }

    pub fn saved_media_items(&self) -> Vec<MediaItem> {
        let mut items: Vec<MediaItem> = self
            .saved_media
            .lock()
            .expect("media cache poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        items
    }

    /// Fetch the configured sticker sets and remember every sticker.
    pub async fn refresh_sticker_cache(&self) {
        let Some(transport) = self.transport() else {
            return;
        };
        let mut wanted: Vec<String> = self.definition.sticker_set_names.clone();
        for (set, _) in &self.definition.explicit_stickers {
            if !wanted.contains(set) {
                wanted.push(set.clone());
            }
        }
        for set_name in wanted {
            match transport.sticker_set(&set_name).await {
                Ok(set) => {
                    let mut stickers = self.stickers.lock().expect("sticker cache poisoned");
                    for sticker in set.stickers {
                        stickers.insert(
                            (set.short_name.clone(), sticker.name.clone()),
                            CachedSticker {
                                unique_id: sticker.unique_id,
                                file_ref: sticker.file_ref,
                                premium: sticker.premium,
                            },
                        );
                    }
                }
                Err(error) => {
                    warn!(agent = %self.name(), set = %set_name, %error, "sticker set fetch failed");
                }
            }
        }
    }

    /// Rebuild the sendable-media cache from Saved Messages.
    pub async fn refresh_saved_media(&self) {
        let Some(transport) = self.transport() else {
            return;
        };
        let self_id = transport.self_id();
        match transport.recent_messages(self_id, 100).await {
            Ok(messages) => {
                let mut fresh: HashMap<String, MediaItem> = HashMap::new();
                for message in &messages {
                    for item in &message.media {
                        fresh.insert(item.unique_id.clone(), item.clone());
                    }
                }
                let count = fresh.len();
                *self.saved_media.lock().expect("media cache poisoned") = fresh;
                tracing::debug!(agent = %self.name(), count, "refreshed saved-media cache");
            }
            Err(error) => {
                tracing::debug!(agent = %self.name(), %error, "saved-media refresh failed");
            }
        }
    }
}

/// All agents, addressable by name or Telegram id.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<Agent>>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<Arc<Agent>>) -> Self {
        Self { agents }
    }

    pub fn all(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents
            .iter()
            .find(|agent| agent.name() == name)
            .cloned()
    }

    pub fn by_id(&self, agent_id: AgentId) -> Option<Arc<Agent>> {
        self.agents
            .iter()
            .find(|agent| agent.agent_id() == Some(agent_id))
            .cloned()
    }
}

/// Everything the runtimes, tick loop, and handlers share. Constructed
/// once at startup, cloned everywhere.
#[derive(Clone)]
pub struct AgentDeps {
    pub registry: Arc<AgentRegistry>,
    pub queue: SharedWorkQueue,
    pub typing: TypingState,
    pub storage: Storage,
    pub clock: Clock,
    pub config: Arc<Config>,
    pub prompts: Arc<PromptLoader>,
    pub budget: DescriptionBudget,
    pub connector: Arc<dyn TransportConnector>,
    pub work_queue_path: PathBuf,
}

impl AgentDeps {
    /// Persist the queue snapshot, logging instead of failing the tick.
    pub fn persist_queue(&self) {
        let queue = self.queue.lock().expect("work queue poisoned");
        if let Err(error) = queue.save(&self.work_queue_path) {
            warn!(%error, "failed to persist work queue");
        }
    }
}

/// Responsiveness of an agent right now, from its stored schedule. Agents
/// without a schedule are always responsive.
pub async fn agent_responsiveness(agent: &Agent, deps: &AgentDeps) -> f32 {
    if agent.definition.daily_schedule_description.is_none() {
        return 1.0;
    }
    let Some(agent_id) = agent.agent_id() else {
        return 1.0;
    };
    match deps.storage.load_schedule(agent_id).await {
        Ok(Some(schedule)) => {
            let now = deps.clock.now();
            let (current, _, _) = schedule.current_activity(now);
            crate::schedule::responsiveness(current)
        }
        Ok(None) => 1.0,
        Err(error) => {
            warn!(agent = %agent.name(), %error, "failed to load schedule");
            1.0
        }
    }
}

/// Load every agent definition and build runtime agents.
pub fn load_agents(config: &Config, shared_chain: Arc<dyn MediaSource>) -> Result<Vec<Arc<Agent>>> {
    let mut agents = Vec::new();
    let mut seen = HashSet::new();
    for path in config.agent_definition_paths() {
        let definition = AgentDefinition::load(&path)?;
        if !seen.insert(definition.name.clone()) {
            // First config directory wins, mirroring prompt lookup order.
            continue;
        }
        let llm = crate::llm::provider_for_model(definition.llm_name.as_deref(), &config.llm_keys)?;
        info!(agent = %definition.name, model = llm.model_name(), "loaded agent definition");
        agents.push(Arc::new(Agent::new(
            definition,
            llm,
            config,
            shared_chain.clone(),
        )));
    }
    Ok(agents)
}
