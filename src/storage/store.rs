//! SQLite-backed store: memories, notes, plans, summaries, events,
//! schedules, conversation overrides, and the task execution log.

use crate::error::{Result, StorageError};
use crate::schedule::Schedule;
use crate::{AgentId, ChannelId, MessageId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use std::path::Path;

/// Entry-bearing tables. Memories and intentions are agent-scoped; notes,
/// plans, and events are additionally keyed by conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTable {
    Memories,
    Intentions,
    Notes,
    Plans,
    Events,
}

impl EntryTable {
    fn table_name(self) -> &'static str {
        match self {
            EntryTable::Memories => "memories",
            EntryTable::Intentions => "intentions",
            EntryTable::Notes => "notes",
            EntryTable::Plans => "plans",
            EntryTable::Events => "events",
        }
    }

    pub fn channel_scoped(self) -> bool {
        matches!(self, EntryTable::Notes | EntryTable::Plans | EntryTable::Events)
    }
}

/// One `{id, content, created}` row.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Entry {
    pub id: String,
    pub content: String,
    pub created: DateTime<Utc>,
}

/// One conversation summary row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SummaryRow {
    pub content: String,
    pub last_message_id: Option<MessageId>,
    pub created: DateTime<Utc>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    agent_id INTEGER NOT NULL,
    entry_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created TEXT NOT NULL,
    PRIMARY KEY (agent_id, entry_id)
);
CREATE TABLE IF NOT EXISTS intentions (
    agent_id INTEGER NOT NULL,
    entry_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created TEXT NOT NULL,
    PRIMARY KEY (agent_id, entry_id)
);
CREATE TABLE IF NOT EXISTS notes (
    agent_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    entry_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created TEXT NOT NULL,
    PRIMARY KEY (agent_id, channel_id, entry_id)
);
CREATE TABLE IF NOT EXISTS plans (
    agent_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    entry_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created TEXT NOT NULL,
    PRIMARY KEY (agent_id, channel_id, entry_id)
);
CREATE TABLE IF NOT EXISTS events (
    agent_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    entry_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created TEXT NOT NULL,
    PRIMARY KEY (agent_id, channel_id, entry_id)
);
CREATE TABLE IF NOT EXISTS summaries (
    agent_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    last_message_id INTEGER,
    created TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS schedules (
    agent_id INTEGER PRIMARY KEY,
    payload TEXT NOT NULL,
    updated TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS conversation_llm (
    agent_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    model TEXT NOT NULL,
    PRIMARY KEY (agent_id, channel_id)
);
CREATE TABLE IF NOT EXISTS conversation_gagged (
    agent_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    gagged INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (agent_id, channel_id)
);
CREATE TABLE IF NOT EXISTS agent_profile_photos (
    agent_id INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    updated TEXT NOT NULL,
    PRIMARY KEY (agent_id, peer_id)
);
CREATE TABLE IF NOT EXISTS task_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    action_kind TEXT NOT NULL,
    action_details TEXT,
    failure_message TEXT,
    task_identifier TEXT,
    created TEXT NOT NULL
);
"#;

/// Pooled handle; cheap to clone.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if needed) the database at `path` and apply the
    /// schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StorageError::from)?;
        let storage = Self { pool };
        storage.apply_schema().await?;
        Ok(storage)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .map_err(StorageError::from)?;
        let storage = Self { pool };
        storage.apply_schema().await?;
        Ok(storage)
    }

    async fn apply_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;
        }
        Ok(())
    }

    // ----- entry tables -----

    /// Insert or update an entry by id. `created` is preserved on update.
    pub async fn upsert_entry(
        &self,
        table: EntryTable,
        agent_id: AgentId,
        channel_id: Option<ChannelId>,
        entry_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let name = table.table_name();
        let created = now.to_rfc3339();
        if table.channel_scoped() {
            let channel_id = channel_id.unwrap_or(0);
            let sql = format!(
                "INSERT INTO {name} (agent_id, channel_id, entry_id, content, created) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (agent_id, channel_id, entry_id) \
                 DO UPDATE SET content = excluded.content"
            );
            sqlx::query(&sql)
                .bind(agent_id)
                .bind(channel_id)
                .bind(entry_id)
                .bind(content)
                .bind(created)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;
        } else {
            let sql = format!(
                "INSERT INTO {name} (agent_id, entry_id, content, created) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT (agent_id, entry_id) \
                 DO UPDATE SET content = excluded.content"
            );
            sqlx::query(&sql)
                .bind(agent_id)
                .bind(entry_id)
                .bind(content)
                .bind(created)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;
        }
        Ok(())
    }

    pub async fn remove_entry(
        &self,
        table: EntryTable,
        agent_id: AgentId,
        channel_id: Option<ChannelId>,
        entry_id: &str,
    ) -> Result<bool> {
        let name = table.table_name();
        let result = if table.channel_scoped() {
            let sql = format!(
                "DELETE FROM {name} WHERE agent_id = ? AND channel_id = ? AND entry_id = ?"
            );
            sqlx::query(&sql)
                .bind(agent_id)
                .bind(channel_id.unwrap_or(0))
                .bind(entry_id)
                .execute(&self.pool)
                .await
        } else {
            let sql = format!("DELETE FROM {name} WHERE agent_id = ? AND entry_id = ?");
            sqlx::query(&sql)
                .bind(agent_id)
                .bind(entry_id)
                .execute(&self.pool)
                .await
        }
        .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_entries(
        &self,
        table: EntryTable,
        agent_id: AgentId,
        channel_id: Option<ChannelId>,
    ) -> Result<Vec<Entry>> {
        let name = table.table_name();
        let rows = if table.channel_scoped() {
            let sql = format!(
                "SELECT entry_id, content, created FROM {name} \
                 WHERE agent_id = ? AND channel_id = ? ORDER BY created"
            );
            sqlx::query(&sql)
                .bind(agent_id)
                .bind(channel_id.unwrap_or(0))
                .fetch_all(&self.pool)
                .await
        } else {
            let sql = format!(
                "SELECT entry_id, content, created FROM {name} \
                 WHERE agent_id = ? ORDER BY created"
            );
            sqlx::query(&sql).bind(agent_id).fetch_all(&self.pool).await
        }
        .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|row| {
                let created: String = row.get("created");
                let created = DateTime::parse_from_rfc3339(&created)
                    .map_err(|e| StorageError::Malformed(format!("bad created stamp: {e}")))?
                    .with_timezone(&Utc);
                Ok(Entry {
                    id: row.get("entry_id"),
                    content: row.get("content"),
                    created,
                })
            })
            .collect()
    }

    pub async fn clear_entries(
        &self,
        table: EntryTable,
        agent_id: AgentId,
        channel_id: Option<ChannelId>,
    ) -> Result<u64> {
        let name = table.table_name();
        let result = if table.channel_scoped() {
            let sql = format!("DELETE FROM {name} WHERE agent_id = ? AND channel_id = ?");
            sqlx::query(&sql)
                .bind(agent_id)
                .bind(channel_id.unwrap_or(0))
                .execute(&self.pool)
                .await
        } else {
            let sql = format!("DELETE FROM {name} WHERE agent_id = ?");
            sqlx::query(&sql).bind(agent_id).execute(&self.pool).await
        }
        .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    // ----- summaries -----

    pub async fn add_summary(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
        content: &str,
        last_message_id: Option<MessageId>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO summaries (agent_id, channel_id, content, last_message_id, created) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(agent_id)
        .bind(channel_id)
        .bind(content)
        .bind(last_message_id)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn summaries(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
    ) -> Result<Vec<SummaryRow>> {
        let rows = sqlx::query(
            "SELECT content, last_message_id, created FROM summaries \
             WHERE agent_id = ? AND channel_id = ? ORDER BY created",
        )
        .bind(agent_id)
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|row| {
                let created: String = row.get("created");
                let created = DateTime::parse_from_rfc3339(&created)
                    .map_err(|e| StorageError::Malformed(format!("bad created stamp: {e}")))?
                    .with_timezone(&Utc);
                Ok(SummaryRow {
                    content: row.get("content"),
                    last_message_id: row.get("last_message_id"),
                    created,
                })
            })
            .collect()
    }

    /// Highest message id covered by any summary, for conversation-start
    /// detection.
    pub async fn highest_summarized_id(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
    ) -> Result<Option<MessageId>> {
        let row = sqlx::query(
            "SELECT MAX(last_message_id) AS highest FROM summaries \
             WHERE agent_id = ? AND channel_id = ?",
        )
        .bind(agent_id)
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.get("highest"))
    }

    pub async fn clear_summaries(&self, agent_id: AgentId, channel_id: ChannelId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM summaries WHERE agent_id = ? AND channel_id = ?")
            .bind(agent_id)
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    // ----- conversation overrides -----

    pub async fn is_gagged(&self, agent_id: AgentId, channel_id: ChannelId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT gagged FROM conversation_gagged WHERE agent_id = ? AND channel_id = ?",
        )
        .bind(agent_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(|r| r.get::<i64, _>("gagged") != 0).unwrap_or(false))
    }

    pub async fn set_gagged(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
        gagged: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_gagged (agent_id, channel_id, gagged) VALUES (?, ?, ?) \
             ON CONFLICT (agent_id, channel_id) DO UPDATE SET gagged = excluded.gagged",
        )
        .bind(agent_id)
        .bind(channel_id)
        .bind(gagged as i64)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn conversation_model(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
    ) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT model FROM conversation_llm WHERE agent_id = ? AND channel_id = ?")
                .bind(agent_id)
                .bind(channel_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(row.map(|r| r.get("model")))
    }

    pub async fn set_conversation_model(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
        model: Option<&str>,
    ) -> Result<()> {
        match model {
            Some(model) => {
                sqlx::query(
                    "INSERT INTO conversation_llm (agent_id, channel_id, model) VALUES (?, ?, ?) \
                     ON CONFLICT (agent_id, channel_id) DO UPDATE SET model = excluded.model",
                )
                .bind(agent_id)
                .bind(channel_id)
                .bind(model)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query("DELETE FROM conversation_llm WHERE agent_id = ? AND channel_id = ?")
                    .bind(agent_id)
                    .bind(channel_id)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(StorageError::from)?;
        Ok(())
    }

    // ----- schedules -----

    pub async fn load_schedule(&self, agent_id: AgentId) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT payload FROM schedules WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                let schedule = serde_json::from_str(&payload)
                    .map_err(|e| StorageError::Malformed(format!("bad schedule payload: {e}")))?;
                Ok(Some(schedule))
            }
            None => Ok(None),
        }
    }

    pub async fn save_schedule(
        &self,
        agent_id: AgentId,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(schedule)
            .map_err(|e| StorageError::Malformed(format!("schedule does not serialize: {e}")))?;
        sqlx::query(
            "INSERT INTO schedules (agent_id, payload, updated) VALUES (?, ?, ?) \
             ON CONFLICT (agent_id) DO UPDATE SET payload = excluded.payload, \
             updated = excluded.updated",
        )
        .bind(agent_id)
        .bind(payload)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    // ----- profile photos -----

    pub async fn profile_photo_description(
        &self,
        agent_id: AgentId,
        peer_id: ChannelId,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT description FROM agent_profile_photos WHERE agent_id = ? AND peer_id = ?",
        )
        .bind(agent_id)
        .bind(peer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(|r| r.get("description")))
    }

    pub async fn set_profile_photo_description(
        &self,
        agent_id: AgentId,
        peer_id: ChannelId,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_profile_photos (agent_id, peer_id, description, updated) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (agent_id, peer_id) DO UPDATE SET description = excluded.description, \
             updated = excluded.updated",
        )
        .bind(agent_id)
        .bind(peer_id)
        .bind(description)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    // ----- task log -----

    pub async fn log_task(
        &self,
        agent_id: AgentId,
        channel_id: ChannelId,
        action_kind: &str,
        action_details: Option<&str>,
        failure_message: Option<&str>,
        task_identifier: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_log (agent_id, channel_id, action_kind, action_details, \
             failure_message, task_identifier, created) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(agent_id)
        .bind(channel_id)
        .bind(action_kind)
        .bind(action_details)
        .bind(failure_message)
        .bind(task_identifier)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    /// Purge log rows older than `days`. Returns how many were deleted.
    pub async fn purge_task_logs(&self, days: i64, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = (now - chrono::Duration::days(days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM task_log WHERE created < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }
}
