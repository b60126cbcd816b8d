//! Prompt markdown files from the configuration directories.

use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Loads `prompts/<Name>.md` files, preferring agent-specific overrides,
/// and caches them for the life of the process.
pub struct PromptLoader {
    config_dirs: Vec<PathBuf>,
    cache: Mutex<HashMap<String, String>>,
}

impl PromptLoader {
    pub fn new(config_dirs: Vec<PathBuf>) -> Self {
        Self {
            config_dirs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load a prompt by name, e.g. `Instructions` for
    /// `prompts/Instructions.md`.
    pub fn load(&self, name: &str) -> Result<String> {
        self.load_for_agent(name, None)
    }

    /// Load a prompt, checking `agents/<agent>/prompts/<name>.md` before
    /// the shared `prompts/<name>.md` in each config directory.
    pub fn load_for_agent(&self, name: &str, agent_name: Option<&str>) -> Result<String> {
        let cache_key = match agent_name {
            Some(agent) => format!("{agent}/{name}"),
            None => name.to_string(),
        };
        if let Some(hit) = self.cache.lock().expect("prompt cache poisoned").get(&cache_key) {
            return Ok(hit.clone());
        }

        for dir in &self.config_dirs {
            let mut candidates = Vec::new();
            if let Some(agent) = agent_name {
                candidates.push(dir.join("agents").join(agent).join("prompts").join(format!("{name}.md")));
            }
            candidates.push(dir.join("prompts").join(format!("{name}.md")));
            for path in candidates {
                if let Ok(text) = std::fs::read_to_string(&path) {
                    let text = text.trim().to_string();
                    self.cache
                        .lock()
                        .expect("prompt cache poisoned")
                        .insert(cache_key, text.clone());
                    return Ok(text);
                }
            }
        }
        Err(ConfigError::MissingPrompt(name.to_string()).into())
    }

    /// Whether a prompt exists without caching a failure.
    pub fn exists(&self, name: &str) -> bool {
        self.load(name).is_ok()
    }
}

/// Replace `{{ agent_name }}` / `{{ partner_name }}` placeholders
/// throughout an assembled prompt.
pub fn substitute(text: &str, agent_name: &str, partner_name: &str) -> String {
    let env = minijinja::Environment::new();
    match env.render_str(
        text,
        minijinja::context! { agent_name => agent_name, partner_name => partner_name },
    ) {
        Ok(rendered) => rendered,
        Err(error) => {
            tracing::warn!(%error, "prompt template substitution failed; using raw text");
            text.to_string()
        }
    }
}
