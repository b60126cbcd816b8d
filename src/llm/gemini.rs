//! Google Gemini binding (generativelanguage.googleapis.com).

use super::provider::{ChatTurn, LlmProvider, TurnRole, closing_instruction};
use crate::error::LlmError;
use base64::Engine as _;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// MIME types Gemini accepts as inline media.
const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
    "image/heif",
    "image/gif",
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "audio/ogg",
    "audio/mpeg",
    "audio/wav",
    "application/pdf",
];

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    fn url(&self) -> String {
        format!("{BASE_URL}/{}:generateContent", self.model)
    }

    async fn generate(&self, body: Value, timeout: Option<Duration>) -> Result<String, LlmError> {
        let mut request = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        debug!(model = %self.model, "sending request to Gemini");
        let response = request.send().await.map_err(|e| map_transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "Gemini API error");
            return Err(LlmError::Http(format!("status {status}: {text}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Http(format!("bad response body: {e}")))?;

        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or(LlmError::Empty)?;

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            if reason.eq_ignore_ascii_case("prohibited_content")
                || reason.eq_ignore_ascii_case("safety")
            {
                return Err(LlmError::ProhibitedContent);
            }
        }

        let text = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text)
    }
}

fn map_transport_error(error: reqwest::Error, timeout: Option<Duration>) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout {
            seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
        }
    } else {
        LlmError::Http(error.to_string())
    }
}

fn turn_role(role: TurnRole) -> &'static str {
    match role {
        TurnRole::Partner => "user",
        TurnRole::Agent => "model",
    }
}

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn prompt_name(&self) -> &str {
        "Gemini"
    }

    async fn query_structured(
        &self,
        system_prompt: &str,
        now_iso: &str,
        chat_type: &str,
        history: &[ChatTurn],
        allowed_task_kinds: &[String],
    ) -> Result<String, LlmError> {
        let mut contents: Vec<Value> = history
            .iter()
            .map(|turn| {
                json!({
                    "role": turn_role(turn.role),
                    "parts": [{ "text": turn.content }],
                })
            })
            .collect();
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": closing_instruction(now_iso, chat_type, allowed_task_kinds) }],
        }));

        let body = json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": contents,
            "generationConfig": { "responseMimeType": "application/json" },
        });
        self.generate(body, None).await
    }

    async fn query_with_json_schema(
        &self,
        system_prompt: &str,
        schema: &Value,
        timeout: Option<Duration>,
    ) -> Result<String, LlmError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": system_prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        });
        self.generate(body, timeout).await
    }

    async fn describe_image(
        &self,
        data: &[u8],
        mime: &str,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inline_data": { "mime_type": mime, "data": encoded } },
                    { "text": "Describe this media in one or two sentences, focusing on \
                               what a person in the conversation would notice." },
                ],
            }],
        });
        self.generate(body, Some(timeout)).await
    }

    fn is_mime_type_supported(&self, mime: &str) -> bool {
        SUPPORTED_MIME_TYPES.contains(&mime)
    }
}
