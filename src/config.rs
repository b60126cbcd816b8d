//! Environment-driven configuration and tunable constants.

use crate::error::{ConfigError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// How often the tick loop runs.
pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// How often each agent's dialogs are scanned for unread content.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Default per-tick budget for AI media description attempts.
pub const MEDIA_DESC_BUDGET_PER_TICK: u32 = 8;

/// Timeout for a single LLM image/audio description call.
pub const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(12);

/// Timeout for fetching a `retrieve` URL.
pub const URL_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// How long fetched URL content stays alive across replans.
pub const FETCHED_RESOURCE_LIFETIME_SECS: u64 = 600;

/// How long a partner-typing stamp gates a `received` task.
pub const TYPING_TTL: Duration = Duration::from_secs(6);

/// Wait injected between retries of a failing task.
pub const RETRY_WAIT_SECS: u64 = 10;

/// Retries before a task is marked failed.
pub const MAX_RETRIES: u32 = 10;

/// Simulated typing speed for outbound messages.
pub const TYPING_CHARS_PER_SEC: f64 = 25.0;
pub const TYPING_DELAY_FLOOR_SECS: u64 = 2;
pub const TYPING_DELAY_CEILING_SECS: u64 = 30;

/// Messages pulled from a conversation for one planning turn.
pub const HISTORY_LIMIT: usize = 50;

/// Task execution log retention.
pub const TASK_LOG_RETENTION_DAYS: i64 = 14;

/// Telegram's service notification account.
pub const TELEGRAM_SYSTEM_USER_ID: i64 = 777_000;

/// Maximum URLs fetched per retrieval round.
pub const MAX_RETRIEVALS_PER_TURN: usize = 3;

/// LLM provider API keys, pulled from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct LlmKeys {
    pub gemini: Option<String>,
    pub grok: Option<String>,
    pub openai: Option<String>,
    pub openrouter: Option<String>,
}

impl LlmKeys {
    pub fn from_env() -> Self {
        Self {
            gemini: non_empty_env("GOOGLE_GEMINI_API_KEY"),
            grok: non_empty_env("GROK_API_KEY"),
            openai: non_empty_env("OPENAI_API_KEY"),
            openrouter: non_empty_env("OPENROUTER_API_KEY"),
        }
    }

    pub fn any(&self) -> bool {
        self.gemini.is_some()
            || self.grok.is_some()
            || self.openai.is_some()
            || self.openrouter.is_some()
    }
}

/// Admin console listener settings.
#[derive(Debug, Clone)]
pub struct AdminConsoleConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
}

/// Server configuration. The binary reads environment variables only.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mutable state root: work queue, media cache, sessions, database.
    pub state_dir: PathBuf,

    /// Configuration roots, highest priority first. Each may contain
    /// `prompts/`, `media/`, and `agents/<name>/` subtrees.
    pub config_dirs: Vec<PathBuf>,

    pub telegram_api_id: i32,
    pub telegram_api_hash: String,

    pub llm_keys: LlmKeys,
    pub admin_console: AdminConsoleConfig,
    pub agent_loop_enabled: bool,
    pub media_budget_per_tick: u32,
}

impl Config {
    /// Load configuration from the environment, validating required keys.
    pub fn from_env() -> Result<Self> {
        let state_dir = PathBuf::from(require_env("CINDY_AGENT_STATE_DIR")?);
        let config_path = require_env("CINDY_AGENT_CONFIG_PATH")?;
        let config_dirs: Vec<PathBuf> = config_path
            .split(':')
            .filter(|part| !part.is_empty())
            .map(PathBuf::from)
            .collect();
        if config_dirs.is_empty() {
            return Err(ConfigError::Invalid(
                "CINDY_AGENT_CONFIG_PATH contains no directories".into(),
            )
            .into());
        }

        let telegram_api_id = require_env("TELEGRAM_API_ID")?
            .parse::<i32>()
            .map_err(|_| ConfigError::Invalid("TELEGRAM_API_ID must be an integer".into()))?;
        let telegram_api_hash = require_env("TELEGRAM_API_HASH")?;

        let llm_keys = LlmKeys::from_env();
        if !llm_keys.any() {
            return Err(ConfigError::Invalid(
                "no LLM provider key set; set one of GOOGLE_GEMINI_API_KEY, GROK_API_KEY, \
                 OPENAI_API_KEY, OPENROUTER_API_KEY"
                    .into(),
            )
            .into());
        }

        let admin_console = AdminConsoleConfig {
            enabled: env_flag("CINDY_ADMIN_CONSOLE_ENABLED", true),
            host: std::env::var("CINDY_ADMIN_CONSOLE_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("CINDY_ADMIN_CONSOLE_PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(5001),
            ssl_cert: non_empty_env("CINDY_ADMIN_CONSOLE_SSL_CERT").map(PathBuf::from),
            ssl_key: non_empty_env("CINDY_ADMIN_CONSOLE_SSL_KEY").map(PathBuf::from),
        };

        let media_budget_per_tick = std::env::var("CINDY_MEDIA_DESC_BUDGET")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(MEDIA_DESC_BUDGET_PER_TICK);

        Ok(Self {
            state_dir,
            config_dirs,
            telegram_api_id,
            telegram_api_hash,
            llm_keys,
            admin_console,
            agent_loop_enabled: env_flag("CINDY_AGENT_LOOP_ENABLED", true),
            media_budget_per_tick,
        })
    }

    /// Work-queue snapshot path.
    pub fn work_queue_path(&self) -> PathBuf {
        self.state_dir.join("work_queue.md")
    }

    /// AI media description cache (JSON records plus optional blobs).
    pub fn media_dir(&self) -> PathBuf {
        self.state_dir.join("media")
    }

    /// SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.state_dir.join("cindy.db")
    }

    /// Per-agent transport session material.
    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    /// Agent persona definition files across all config roots.
    pub fn agent_definition_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for dir in &self.config_dirs {
            let agents = dir.join("agents");
            let Ok(entries) = std::fs::read_dir(&agents) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                    paths.push(path);
                }
            }
        }
        paths.sort();
        paths
    }
}

fn require_env(name: &'static str) -> Result<String> {
    match non_empty_env(name) {
        Some(value) => Ok(value),
        None => Err(ConfigError::MissingEnv(name).into()),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a boolean flag from the environment, tolerating common spellings.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
