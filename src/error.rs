//! Top-level error types for the agent server.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the task-graph retry machinery should re-queue the failing
    /// task instead of failing it outright.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Config(_) => false,
            Error::Chat(e) => e.is_transient(),
            Error::Llm(e) => e.is_transient(),
            Error::Storage(_) => true,
            Error::Media(e) => e.is_transient(),
            Error::Task(e) => matches!(e, TaskError::Transient(_)),
            Error::Io(_) => true,
            Error::Other(_) => true,
        }
    }
}

/// Configuration and startup validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("prompt file not found in any configuration directory: {0}.md")]
    MissingPrompt(String),

    #[error("agent definition {path}: {message}")]
    AgentDefinition { path: String, message: String },
}

/// Chat transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("session is not authorized")]
    NotAuthorized,

    #[error("flood wait: retry after {seconds}s")]
    FloodWait { seconds: u32 },

    #[error("cannot write to this conversation")]
    WriteForbidden,

    #[error("no such entity: {id}")]
    EntityNotFound { id: i64 },

    #[error("transport request failed: {0}")]
    Request(String),
}

impl ChatError {
    /// Entity resolution failures are permanent; everything else is worth
    /// retrying after a wait.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ChatError::EntityNotFound { .. } | ChatError::WriteForbidden)
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("missing API key for provider: {0}")]
    MissingKey(&'static str),

    #[error("no provider recognizes model name: {0}")]
    UnknownProvider(String),

    #[error("LLM request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("LLM refused: prohibited content")]
    ProhibitedContent,

    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM reply is malformed: {0}")]
    Malformed(String),

    #[error("LLM returned an empty reply")]
    Empty,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmError::MissingKey(_) | LlmError::UnknownProvider(_))
    }
}

/// Relational store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("malformed stored record: {0}")]
    Malformed(String),
}

/// Media pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media download failed: {0}")]
    Download(String),

    #[error("failed to write media cache entry: {0}")]
    CacheWrite(#[from] std::io::Error),
}

impl MediaError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MediaError::Download(_))
    }
}

/// Task dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The handler hit a condition that should clear up on its own; the
    /// graph injects a retry wait and re-queues the task.
    #[error("transient task failure: {0}")]
    Transient(String),

    /// Retrying cannot help; the task is marked failed immediately.
    #[error("permanent task failure: {0}")]
    Permanent(String),
}
