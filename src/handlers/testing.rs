//! Shared fixtures for handler tests.

use super::registry::HandlerCtx;
use crate::agent::testing::agent_fixture;
use crate::chat::testing::RecordingTransport;
use crate::error::LlmError;
use crate::llm::{ChatTurn, LlmProvider};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider double returning scripted replies in sequence; repeats the
/// last one when the script runs out.
pub struct ScriptedLlm {
    replies: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new(&["[]"])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
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
        system_prompt: &str,
        _now_iso: &str,
        _chat_type: &str,
        _history: &[ChatTurn],
        _allowed_task_kinds: &[String],
    ) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(system_prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            Ok(replies.pop().unwrap())
        } else {
            replies.last().cloned().ok_or(LlmError::Empty)
        }
    }

    async fn query_with_json_schema(
        &self,
        _system_prompt: &str,
        _schema: &serde_json::Value,
        _timeout: Option<Duration>,
    ) -> Result<String, LlmError> {
        Ok("{}".into())
    }

    async fn describe_image(
        &self,
        _data: &[u8],
        _mime: &str,
        _timeout: Duration,
    ) -> Result<String, LlmError> {
        Ok("a scripted description".into())
    }

    fn is_mime_type_supported(&self, mime: &str) -> bool {
        mime.starts_with("image/")
    }
}

/// Handler context over a recording transport and a scripted model.
pub async fn ctx_fixture_with(
    dir: &std::path::Path,
    llm: Arc<ScriptedLlm>,
) -> (HandlerCtx, Arc<RecordingTransport>) {
    let (agent, deps) = agent_fixture(dir, llm).await;
    let transport = Arc::new(RecordingTransport::new(1));
    agent.set_transport(transport.clone());
    let ctx = HandlerCtx {
        agent,
        deps,
        graph_id: "recv-test".into(),
        agent_id: 1,
        channel_id: 2,
        is_group_chat: false,
    };
    (ctx, transport)
}

pub async fn ctx_fixture(dir: &std::path::Path) -> (HandlerCtx, Arc<RecordingTransport>) {
    ctx_fixture_with(dir, ScriptedLlm::empty()).await
}
