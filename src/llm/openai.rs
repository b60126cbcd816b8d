//! OpenAI-compatible chat-completions binding, covering OpenAI, Grok, and
//! OpenRouter endpoints.

use super::provider::{ChatTurn, LlmProvider, TurnRole, closing_instruction};
use crate::error::LlmError;
use base64::Engine as _;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// MIME types accepted as `image_url` data URLs.
const SUPPORTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    prompt_name: &'static str,
}

impl OpenAiCompatProvider {
    pub fn openai(api_key: String, model: &str) -> Self {
        Self::with_base("https://api.openai.com", api_key, model, "OpenAI")
    }

    pub fn grok(api_key: String, model: &str) -> Self {
        Self::with_base("https://api.x.ai", api_key, model, "Grok")
    }

    pub fn openrouter(api_key: String, model: &str) -> Self {
        Self::with_base("https://openrouter.ai/api", api_key, model, "OpenRouter")
    }

    fn with_base(base_url: &str, api_key: String, model: &str, prompt_name: &'static str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.to_string(),
            model: model.to_string(),
            prompt_name,
        }
    }

    async fn complete(&self, body: Value, timeout: Option<Duration>) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        debug!(model = %self.model, provider = self.prompt_name, "sending chat completion");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
                }
            } else {
                LlmError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "chat completion error");
            return Err(LlmError::Http(format!("status {status}: {text}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Http(format!("bad response body: {e}")))?;

        let choice = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or(LlmError::Empty)?;

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            if reason.eq_ignore_ascii_case("content_filter") {
                return Err(LlmError::ProhibitedContent);
            }
        }

        let text = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text.to_string())
    }
}

fn turn_role(role: TurnRole) -> &'static str {
    match role {
        TurnRole::Partner => "user",
        TurnRole::Agent => "assistant",
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn prompt_name(&self) -> &str {
        self.prompt_name
    }

    async fn query_structured(
        &self,
        system_prompt: &str,
        now_iso: &str,
        chat_type: &str,
        history: &[ChatTurn],
        allowed_task_kinds: &[String],
    ) -> Result<String, LlmError> {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
        messages.extend(history.iter().map(|turn| {
            json!({ "role": turn_role(turn.role), "content": turn.content })
        }));
        messages.push(json!({
            "role": "user",
            "content": closing_instruction(now_iso, chat_type, allowed_task_kinds),
        }));

        let body = json!({ "model": self.model, "messages": messages });
        self.complete(body, None).await
    }

    async fn query_with_json_schema(
        &self,
        system_prompt: &str,
        schema: &Value,
        timeout: Option<Duration>,
    ) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": system_prompt }],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "reply", "schema": schema },
            },
        });
        self.complete(body, timeout).await
    }

    async fn describe_image(
        &self,
        data: &[u8],
        mime: &str,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "Describe this media in one or two sentences, \
                       focusing on what a person in the conversation would notice." },
                    { "type": "image_url", "image_url": { "url": format!("data:{mime};base64,{encoded}") } },
                ],
            }],
        });
        self.complete(body, Some(timeout)).await
    }

    fn is_mime_type_supported(&self, mime: &str) -> bool {
        SUPPORTED_MIME_TYPES.contains(&mime)
    }
}
