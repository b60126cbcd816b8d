//! Shared state and error plumbing for console handlers.

use crate::agent::{Agent, AgentDeps};
use crate::AgentId;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Handler state: the same dependency bundle the core runs on.
pub struct ApiState {
    pub deps: AgentDeps,
}

impl ApiState {
    pub fn new(deps: AgentDeps) -> Arc<Self> {
        Arc::new(Self { deps })
    }

    /// Resolve an agent by name, 404 on miss.
    pub fn agent(&self, name: &str) -> Result<Arc<Agent>, ApiError> {
        self.deps
            .registry
            .by_name(name)
            .ok_or_else(|| ApiError::not_found(format!("no agent named '{name}'")))
    }

    /// Resolve an agent that is authenticated (has a Telegram id).
    pub fn authenticated_agent(&self, name: &str) -> Result<(Arc<Agent>, AgentId), ApiError> {
        let agent = self.agent(name)?;
        let agent_id = agent.agent_id().ok_or_else(|| {
            ApiError::conflict(format!("agent '{name}' is not authenticated yet"))
        })?;
        Ok((agent, agent_id))
    }
}

/// JSON `{"error": …}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<crate::Error> for ApiError {
    fn from(error: crate::Error) -> Self {
        Self::internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
