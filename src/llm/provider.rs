//! The provider trait the planner is written against, plus model-name
//! based provider selection.

use crate::config::LlmKeys;
use crate::error::LlmError;
use std::sync::Arc;
use std::time::Duration;

/// Who spoke a history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    /// A conversation participant (rendered as the user side).
    Partner,
    /// The agent itself.
    Agent,
}

/// One rendered history turn handed to the provider.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn partner(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Partner,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            content: content.into(),
        }
    }
}

/// A text-planning and media-description model.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Name of the provider-specific instructions prompt file
    /// (`prompts/<name>.md`).
    fn prompt_name(&self) -> &str;

    /// How many history messages one planning turn should see.
    fn history_size(&self) -> usize {
        crate::config::HISTORY_LIMIT
    }

    /// One planning turn: returns the raw reply text, expected to be a
    /// JSON array of task objects.
    async fn query_structured(
        &self,
        system_prompt: &str,
        now_iso: &str,
        chat_type: &str,
        history: &[ChatTurn],
        allowed_task_kinds: &[String],
    ) -> Result<String, LlmError>;

    /// Schema-constrained one-shot query (admin tooling, classification).
    async fn query_with_json_schema(
        &self,
        system_prompt: &str,
        schema: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<String, LlmError>;

    /// Describe an image/animation/audio blob.
    async fn describe_image(
        &self,
        data: &[u8],
        mime: &str,
        timeout: Duration,
    ) -> Result<String, LlmError>;

    /// Whether the provider can ingest this MIME type at all. Checked
    /// before budget so unsupported formats never drain it.
    fn is_mime_type_supported(&self, mime: &str) -> bool;
}

/// Final user turn appended to every planning query: anchors the current
/// time, the chat type, and the reply contract.
pub(crate) fn closing_instruction(
    now_iso: &str,
    chat_type: &str,
    allowed_task_kinds: &[String],
) -> String {
    let mut text = format!(
        "The current time is {now_iso}. This is a {chat_type} chat.\n\
         Reply with a JSON array of task objects and nothing else."
    );
    if !allowed_task_kinds.is_empty() {
        text.push_str(&format!(
            "\nAllowed task kinds: {}.",
            allowed_task_kinds.join(", ")
        ));
    }
    text
}

/// Pick a provider for an agent's configured model name.
///
/// `provider/model` forms route to OpenRouter; otherwise the prefix picks
/// the provider (`gemini-*`, `grok-*`, `gpt-*`/`openai-*`). An empty name
/// defaults to Gemini.
pub fn provider_for_model(
    llm_name: Option<&str>,
    keys: &LlmKeys,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let name = llm_name.map(str::trim).filter(|n| !n.is_empty());
    let lowered = name.map(str::to_ascii_lowercase);

    match lowered.as_deref() {
        None => {
            let key = keys.gemini.clone().ok_or(LlmError::MissingKey("GOOGLE_GEMINI_API_KEY"))?;
            Ok(Arc::new(super::gemini::GeminiProvider::new(key, None)))
        }
        Some(lower) if lower.contains('/') || lower.starts_with("openrouter") => {
            let key = keys
                .openrouter
                .clone()
                .ok_or(LlmError::MissingKey("OPENROUTER_API_KEY"))?;
            Ok(Arc::new(super::openai::OpenAiCompatProvider::openrouter(
                key,
                name.unwrap(),
            )))
        }
        Some(lower) if lower.starts_with("gemini") => {
            let key = keys.gemini.clone().ok_or(LlmError::MissingKey("GOOGLE_GEMINI_API_KEY"))?;
            Ok(Arc::new(super::gemini::GeminiProvider::new(key, name)))
        }
        Some(lower) if lower.starts_with("grok") => {
            let key = keys.grok.clone().ok_or(LlmError::MissingKey("GROK_API_KEY"))?;
            Ok(Arc::new(super::openai::OpenAiCompatProvider::grok(
                key,
                name.unwrap(),
            )))
        }
        Some(lower) if lower.starts_with("gpt") || lower.starts_with("openai") => {
            let key = keys.openai.clone().ok_or(LlmError::MissingKey("OPENAI_API_KEY"))?;
            Ok(Arc::new(super::openai::OpenAiCompatProvider::openai(
                key,
                name.unwrap(),
            )))
        }
        Some(_) => Err(LlmError::UnknownProvider(name.unwrap().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_with_all() -> LlmKeys {
        LlmKeys {
            gemini: Some("g".into()),
            grok: Some("x".into()),
            openai: Some("o".into()),
            openrouter: Some("r".into()),
        }
    }

    #[test]
    fn model_names_route_to_providers() {
        let keys = keys_with_all();
        assert_eq!(
            provider_for_model(None, &keys).unwrap().prompt_name(),
            "Gemini"
        );
        assert_eq!(
            provider_for_model(Some("gemini-2.0-flash"), &keys)
                .unwrap()
                .model_name(),
            "gemini-2.0-flash"
        );
        assert_eq!(
            provider_for_model(Some("grok-3"), &keys).unwrap().prompt_name(),
            "Grok"
        );
        // Slash form routes to OpenRouter even with an "openai" prefix.
        assert_eq!(
            provider_for_model(Some("openai/gpt-oss-120b"), &keys)
                .unwrap()
                .prompt_name(),
            "OpenRouter"
        );
    }

    #[test]
    fn missing_key_is_a_hard_error() {
        let keys = LlmKeys::default();
        assert!(matches!(
            provider_for_model(Some("grok-3"), &keys),
            Err(LlmError::MissingKey("GROK_API_KEY"))
        ));
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        let keys = keys_with_all();
        assert!(matches!(
            provider_for_model(Some("llama9"), &keys),
            Err(LlmError::UnknownProvider(_))
        ));
    }
}
