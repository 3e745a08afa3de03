//! Durable log of agent memories, inter-agent messages and planning rows.
//!
//! Every append is a single autocommitted insert, so a row is on disk
//! before the call returns. Ids come from `INTEGER PRIMARY KEY
//! AUTOINCREMENT` and only ever increase. Timestamps are stored as unix
//! milliseconds; reads order by timestamp, then id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};

use crate::error::{HubError, HubResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS memories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT NOT NULL,
        memory_type TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id TEXT NOT NULL,
        recipient_id TEXT NOT NULL,
        message TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS planning (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        plan_type TEXT NOT NULL,
        content TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories (agent_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_pair ON conversations (sender_id, recipient_id)",
    "CREATE INDEX IF NOT EXISTS idx_planning_task ON planning (task_id, created_at)",
];

const EXPORT_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Thinking,
    Planning,
    Execution,
    Research,
    Evaluation,
    Conversation,
}

impl MemoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Thinking => "thinking",
            MemoryType::Planning => "planning",
            MemoryType::Execution => "execution",
            MemoryType::Research => "research",
            MemoryType::Evaluation => "evaluation",
            MemoryType::Conversation => "conversation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "thinking" => Some(MemoryType::Thinking),
            "planning" => Some(MemoryType::Planning),
            "execution" => Some(MemoryType::Execution),
            "research" => Some(MemoryType::Research),
            "evaluation" => Some(MemoryType::Evaluation),
            "conversation" => Some(MemoryType::Conversation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub agent_id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub sender_id: String,
    pub recipient_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningRecord {
    pub id: i64,
    pub task_id: String,
    pub agent_id: String,
    pub plan_type: String,
    pub content: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_agent: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub total: i64,
    pub by_sender: BTreeMap<String, i64>,
    pub by_recipient: BTreeMap<String, i64>,
    /// Keyed by two-digit UTC hour of day ("00".."23").
    pub by_hour: BTreeMap<String, i64>,
}

#[derive(Debug, Clone)]
pub struct PersistentLog {
    pool: SqlitePool,
}

impl PersistentLog {
    /// Opens (creating if needed) the database behind `db_url` and applies
    /// the idempotent schema.
    pub async fn open(db_url: &str) -> HubResult<Self> {
        ensure_parent_dir_for_sqlite_url(db_url)?;
        let in_memory = db_url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        // Each in-memory connection is its own database, so pin a single one.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options.connect_with(options).await?;
        let log = Self { pool };
        log.init_schema().await?;
        tracing::debug!(in_memory, "persistent log opened");
        Ok(log)
    }

    pub async fn init_schema(&self) -> HubResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- memories ------------------------------------------------------

    pub async fn append_memory(
        &self,
        agent_id: &str,
        memory_type: MemoryType,
        content: &str,
        metadata: Option<Value>,
    ) -> HubResult<i64> {
        let metadata = serde_json::to_string(&metadata.unwrap_or_else(|| Value::Object(Default::default())))?;
        let result = sqlx::query(
            "INSERT INTO memories (agent_id, memory_type, content, metadata, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(agent_id)
        .bind(memory_type.as_str())
        .bind(content)
        .bind(metadata)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest-first memories for one agent, optionally of a single type.
    pub async fn memories_for_agent(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> HubResult<Vec<MemoryRecord>> {
        let rows = match memory_type {
            Some(kind) => {
                sqlx::query(
                    "SELECT * FROM memories WHERE agent_id = ? AND memory_type = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(agent_id)
                .bind(kind.as_str())
                .bind(sql_limit(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM memories WHERE agent_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(agent_id)
                .bind(sql_limit(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(memory_from_row).collect()
    }

    /// Newest-first substring search. Agent and type filters apply before
    /// the limit.
    pub async fn search_memories(
        &self,
        query: &str,
        agent_id: Option<&str>,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> HubResult<Vec<MemoryRecord>> {
        let kind = memory_type.map(MemoryType::as_str);
        let rows = sqlx::query(
            "SELECT * FROM memories WHERE content LIKE ? ESCAPE '\\' AND (? IS NULL OR agent_id = ?) AND (? IS NULL OR memory_type = ?) ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(like_pattern(query))
        .bind(agent_id)
        .bind(agent_id)
        .bind(kind)
        .bind(kind)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(memory_from_row).collect()
    }

    /// Memories created in `[start, end)`, oldest first.
    pub async fn memories_in_range(
        &self,
        agent_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HubResult<Vec<MemoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM memories WHERE created_at >= ? AND created_at < ? AND (? IS NULL OR agent_id = ?) ORDER BY created_at ASC, id ASC",
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .bind(agent_id)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(memory_from_row).collect()
    }

    pub async fn delete_memory(&self, id: i64) -> HubResult<bool> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clears memories matching the filters; no filters clears the table.
    pub async fn clear_memories(
        &self,
        agent_id: Option<&str>,
        memory_type: Option<MemoryType>,
    ) -> HubResult<u64> {
        let kind = memory_type.map(MemoryType::as_str);
        let result = sqlx::query(
            "DELETE FROM memories WHERE (? IS NULL OR agent_id = ?) AND (? IS NULL OR memory_type = ?)",
        )
        .bind(agent_id)
        .bind(agent_id)
        .bind(kind)
        .bind(kind)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn memory_stats(&self, agent_id: Option<&str>) -> HubResult<MemoryStats> {
        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM memories WHERE (? IS NULL OR agent_id = ?)")
                .bind(agent_id)
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;
        let by_type = self
            .grouped_counts(
                "SELECT memory_type AS k, COUNT(*) AS n FROM memories WHERE (? IS NULL OR agent_id = ?) GROUP BY memory_type",
                agent_id,
            )
            .await?;
        let by_agent = self
            .grouped_counts(
                "SELECT agent_id AS k, COUNT(*) AS n FROM memories WHERE (? IS NULL OR agent_id = ?) GROUP BY agent_id",
                agent_id,
            )
            .await?;
        Ok(MemoryStats {
            total,
            by_type,
            by_agent,
        })
    }

    // ---- conversations -------------------------------------------------

    pub async fn append_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
    ) -> HubResult<i64> {
        let result = sqlx::query(
            "INSERT INTO conversations (sender_id, recipient_id, message, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(body)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest-first messages sent or received by `agent_id`, or all
    /// messages when no agent is given.
    pub async fn conversation_history(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> HubResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE (? IS NULL OR sender_id = ? OR recipient_id = ?) ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(agent_id)
        .bind(agent_id)
        .bind(agent_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    /// Messages exchanged between two ids in either direction, newest first.
    pub async fn conversation_between(
        &self,
        a: &str,
        b: &str,
        limit: usize,
    ) -> HubResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE (sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?) ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn search_conversations(
        &self,
        query: &str,
        limit: usize,
    ) -> HubResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE message LIKE ? ESCAPE '\\' ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(like_pattern(query))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn messages_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HubResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE timestamp >= ? AND timestamp < ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn delete_conversation(&self, id: i64) -> HubResult<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clears messages an agent sent or received; no agent clears the table.
    pub async fn clear_conversations(&self, agent_id: Option<&str>) -> HubResult<u64> {
        let result = sqlx::query(
            "DELETE FROM conversations WHERE (? IS NULL OR sender_id = ? OR recipient_id = ?)",
        )
        .bind(agent_id)
        .bind(agent_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn conversation_stats(&self, agent_id: Option<&str>) -> HubResult<ConversationStats> {
        const FILTER: &str = "(? IS NULL OR sender_id = ? OR recipient_id = ?)";
        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM conversations WHERE {FILTER}"
        ))
        .bind(agent_id)
        .bind(agent_id)
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        let mut stats = ConversationStats {
            total,
            ..Default::default()
        };
        for (column, target) in [
            ("sender_id", &mut stats.by_sender),
            ("recipient_id", &mut stats.by_recipient),
            (
                "strftime('%H', timestamp / 1000, 'unixepoch')",
                &mut stats.by_hour,
            ),
        ] {
            let rows = sqlx::query(&format!(
                "SELECT {column} AS k, COUNT(*) AS n FROM conversations WHERE {FILTER} GROUP BY k"
            ))
            .bind(agent_id)
            .bind(agent_id)
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                target.insert(row.try_get("k")?, row.try_get("n")?);
            }
        }
        Ok(stats)
    }

    /// Renders up to the newest 1000 messages (optionally for one agent) in
    /// chronological order, as pretty JSON or a line transcript.
    pub async fn export_conversations(
        &self,
        agent_id: Option<&str>,
        format: ExportFormat,
    ) -> HubResult<String> {
        let mut records = self.conversation_history(agent_id, EXPORT_LIMIT).await?;
        records.reverse();
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&records)?),
            ExportFormat::Text => Ok(records
                .iter()
                .map(render_transcript_line)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }

    // ---- planning ------------------------------------------------------

    pub async fn append_planning(
        &self,
        task_id: &str,
        agent_id: &str,
        plan_type: &str,
        content: &str,
        status: &str,
    ) -> HubResult<i64> {
        let now = now_ms();
        let result = sqlx::query(
            "INSERT INTO planning (task_id, agent_id, plan_type, content, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(agent_id)
        .bind(plan_type)
        .bind(content)
        .bind(status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_planning_status(&self, id: i64, status: &str) -> HubResult<bool> {
        let result = sqlx::query("UPDATE planning SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rows for `task_id` in creation order. With `include_children`, rows
    /// for derived ids (`<task_id>_subtask_N`, `<task_id>_step_N`) are
    /// included as well.
    pub async fn planning_for_task(
        &self,
        task_id: &str,
        include_children: bool,
    ) -> HubResult<Vec<PlanningRecord>> {
        let rows = if include_children {
            let prefix = format!("{task_id}_");
            sqlx::query(
                "SELECT * FROM planning WHERE task_id = ? OR substr(task_id, 1, ?) = ? ORDER BY created_at ASC, id ASC",
            )
            .bind(task_id)
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT * FROM planning WHERE task_id = ? ORDER BY created_at ASC, id ASC")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?
        };
        rows.iter().map(planning_from_row).collect()
    }

    async fn grouped_counts(
        &self,
        sql: &str,
        agent_id: Option<&str>,
    ) -> HubResult<BTreeMap<String, i64>> {
        let rows = sqlx::query(sql)
            .bind(agent_id)
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await?;
        let mut out = BTreeMap::new();
        for row in rows {
            out.insert(row.try_get("k")?, row.try_get("n")?);
        }
        Ok(out)
    }
}

pub fn render_transcript_line(record: &MessageRecord) -> String {
    format!(
        "[{}] {} -> {}: {}",
        record.timestamp.to_rfc3339(),
        record.sender_id,
        record.recipient_id,
        record.message
    )
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn memory_from_row(row: &SqliteRow) -> HubResult<MemoryRecord> {
    let kind: String = row.try_get("memory_type")?;
    let memory_type = MemoryType::parse(&kind).ok_or_else(|| {
        HubError::Storage(sqlx::Error::Decode(
            format!("unknown memory type '{kind}'").into(),
        ))
    })?;
    let metadata: String = row.try_get("metadata")?;
    Ok(MemoryRecord {
        id: row.try_get("id")?,
        agent_id: row.try_get("agent_id")?,
        memory_type,
        content: row.try_get("content")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: ms_to_datetime(row.try_get("created_at")?),
    })
}

fn message_from_row(row: &SqliteRow) -> HubResult<MessageRecord> {
    Ok(MessageRecord {
        id: row.try_get("id")?,
        sender_id: row.try_get("sender_id")?,
        recipient_id: row.try_get("recipient_id")?,
        message: row.try_get("message")?,
        timestamp: ms_to_datetime(row.try_get("timestamp")?),
    })
}

fn planning_from_row(row: &SqliteRow) -> HubResult<PlanningRecord> {
    Ok(PlanningRecord {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        agent_id: row.try_get("agent_id")?,
        plan_type: row.try_get("plan_type")?,
        content: row.try_get("content")?,
        status: row.try_get("status")?,
        created_at: ms_to_datetime(row.try_get("created_at")?),
        updated_at: ms_to_datetime(row.try_get("updated_at")?),
    })
}

pub fn ensure_parent_dir_for_sqlite_url(db_url: &str) -> HubResult<()> {
    let Some(db_path) = sqlite_path_from_url(db_url) else {
        return Ok(());
    };

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| HubError::Storage(sqlx::Error::Io(e)))?;
    }
    Ok(())
}

pub fn sqlite_path_from_url(db_url: &str) -> Option<PathBuf> {
    let path_with_params = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))?;
    let path_without_params = path_with_params
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(path_with_params);

    if path_without_params.is_empty() || path_without_params.contains(":memory:") {
        return None;
    }

    Some(Path::new(path_without_params).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn memory_log() -> PersistentLog {
        PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open")
    }

    #[tokio::test]
    async fn append_ids_increase_monotonically() {
        let log = memory_log().await;
        let a = log.append_message("a", "b", "one").await.expect("append");
        let b = log.append_message("b", "a", "two").await.expect("append");
        let m = log
            .append_memory("a", MemoryType::Thinking, "idea", None)
            .await
            .expect("append memory");
        let m2 = log
            .append_memory("a", MemoryType::Thinking, "idea 2", None)
            .await
            .expect("append memory");
        assert!(b > a);
        assert!(m2 > m);
    }

    #[tokio::test]
    async fn conversation_between_is_direction_agnostic() {
        let log = memory_log().await;
        log.append_message("a", "b", "hi").await.expect("append");
        log.append_message("b", "a", "hello").await.expect("append");
        log.append_message("a", "c", "elsewhere").await.expect("append");

        let ab = log.conversation_between("a", "b", 50).await.expect("query");
        let ba = log.conversation_between("b", "a", 50).await.expect("query");
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 2);
        assert!(ab.iter().any(|m| m.sender_id == "a" && m.message == "hi"));
        assert_eq!(ab[0].message, "hello", "newest first");
    }

    #[tokio::test]
    async fn memories_filter_by_type_and_search_escapes_wildcards() {
        let log = memory_log().await;
        log.append_memory("r1", MemoryType::Research, "100% coverage", Some(json!({"k": 1})))
            .await
            .expect("append");
        log.append_memory("r1", MemoryType::Thinking, "1000 coverage", None)
            .await
            .expect("append");
        log.append_memory("p1", MemoryType::Research, "other agent", None)
            .await
            .expect("append");

        let research = log
            .memories_for_agent("r1", Some(MemoryType::Research), 10)
            .await
            .expect("query");
        assert_eq!(research.len(), 1);
        assert_eq!(research[0].metadata, json!({"k": 1}));

        let hits = log.search_memories("100%", None, None, 10).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "100% coverage");

        let scoped = log
            .search_memories("agent", Some("r1"), None, 10)
            .await
            .expect("search");
        assert!(scoped.is_empty());
    }

    #[tokio::test]
    async fn search_applies_type_filter_before_limit() {
        let log = memory_log().await;
        log.append_memory("r1", MemoryType::Research, "coverage report", None)
            .await
            .expect("append");
        for i in 0..3 {
            log.append_memory("r1", MemoryType::Thinking, &format!("coverage idea {i}"), None)
                .await
                .expect("append");
        }

        let hits = log
            .search_memories("coverage", Some("r1"), Some(MemoryType::Research), 1)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "coverage report");
    }

    #[tokio::test]
    async fn delete_memory_removes_only_the_given_row() {
        let log = memory_log().await;
        let keep = log
            .append_memory("r1", MemoryType::Thinking, "keep", None)
            .await
            .expect("append");
        let drop = log
            .append_memory("r1", MemoryType::Thinking, "drop", None)
            .await
            .expect("append");

        assert!(log.delete_memory(drop).await.expect("delete"));
        assert!(!log.delete_memory(drop).await.expect("delete again"));
        let left = log.memories_for_agent("r1", None, 10).await.expect("query");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, keep);
    }

    #[tokio::test]
    async fn time_range_is_half_open() {
        let log = memory_log().await;
        log.append_message("a", "b", "inside").await.expect("append");
        let rows = log.conversation_history(None, 10).await.expect("history");
        let ts = rows[0].timestamp;

        let hit = log
            .messages_in_range(ts, ts + chrono::Duration::milliseconds(1))
            .await
            .expect("range");
        assert_eq!(hit.len(), 1);
        let miss = log
            .messages_in_range(ts - chrono::Duration::seconds(5), ts)
            .await
            .expect("range");
        assert!(miss.is_empty());

        let memories = log
            .memories_in_range(Some("a"), ts, ts + chrono::Duration::seconds(1))
            .await
            .expect("range");
        assert!(memories.is_empty());
    }

    #[tokio::test]
    async fn clear_filters_apply_to_either_side_of_a_message() {
        let log = memory_log().await;
        log.append_message("a", "b", "1").await.expect("append");
        log.append_message("c", "a", "2").await.expect("append");
        log.append_message("c", "d", "3").await.expect("append");

        assert_eq!(log.clear_conversations(Some("a")).await.expect("clear"), 2);
        let rest = log.conversation_history(None, 10).await.expect("history");
        assert_eq!(rest.len(), 1);
        assert!(log.delete_conversation(rest[0].id).await.expect("delete"));
        assert_eq!(log.clear_conversations(None).await.expect("clear"), 0);

        log.append_memory("a", MemoryType::Research, "x", None).await.expect("append");
        log.append_memory("a", MemoryType::Thinking, "y", None).await.expect("append");
        log.append_memory("b", MemoryType::Research, "z", None).await.expect("append");
        assert_eq!(
            log.clear_memories(Some("a"), Some(MemoryType::Research))
                .await
                .expect("clear"),
            1
        );
        assert_eq!(log.clear_memories(None, None).await.expect("clear"), 2);
    }

    #[tokio::test]
    async fn stats_group_by_type_agent_and_hour() {
        let log = memory_log().await;
        log.append_memory("a", MemoryType::Research, "x", None).await.expect("append");
        log.append_memory("a", MemoryType::Thinking, "y", None).await.expect("append");
        log.append_memory("b", MemoryType::Research, "z", None).await.expect("append");
        let stats = log.memory_stats(None).await.expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("research"), Some(&2));
        assert_eq!(stats.by_agent.get("b"), Some(&1));

        log.append_message("a", "b", "1").await.expect("append");
        log.append_message("b", "a", "2").await.expect("append");
        log.append_message("c", "d", "3").await.expect("append");
        let conv = log.conversation_stats(Some("a")).await.expect("stats");
        assert_eq!(conv.total, 2);
        assert_eq!(conv.by_sender.get("a"), Some(&1));
        assert_eq!(conv.by_hour.values().sum::<i64>(), 2);
        assert!(conv.by_hour.keys().all(|hour| hour.len() == 2));
    }

    #[tokio::test]
    async fn export_renders_json_and_transcript_in_chronological_order() {
        let log = memory_log().await;
        log.append_message("a", "b", "first").await.expect("append");
        log.append_message("b", "a", "second").await.expect("append");

        let text = log
            .export_conversations(Some("a"), ExportFormat::Text)
            .await
            .expect("export");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("a -> b: first"));
        assert!(lines[0].starts_with('['));

        let json = log
            .export_conversations(None, ExportFormat::Json)
            .await
            .expect("export");
        let parsed: Vec<MessageRecord> = serde_json::from_str(&json).expect("valid json");
        assert_eq!(parsed[1].message, "second");
    }

    #[tokio::test]
    async fn planning_rows_include_children_on_request() {
        let log = memory_log().await;
        let id = log
            .append_planning("task_1", "system", "task_creation", "root", "created")
            .await
            .expect("append");
        log.append_planning("task_1_subtask_0", "system", "subtask", "child", "created")
            .await
            .expect("append");
        log.append_planning("task_10", "system", "task_creation", "other", "created")
            .await
            .expect("append");

        assert_eq!(log.planning_for_task("task_1", false).await.expect("q").len(), 1);
        let tree = log.planning_for_task("task_1", true).await.expect("q");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, id);

        assert!(log.update_planning_status(id, "completed").await.expect("update"));
        assert!(!log.update_planning_status(9999, "completed").await.expect("update"));
        let tree = log.planning_for_task("task_1", false).await.expect("q");
        assert_eq!(tree[0].status, "completed");
    }

    #[tokio::test]
    async fn file_backed_log_survives_reopen() {
        let dir = tempdir().expect("tempdir should be created");
        let url = format!("sqlite://{}/nested/hub.db", dir.path().display());
        {
            let log = PersistentLog::open(&url).await.expect("open");
            log.append_message("a", "b", "durable").await.expect("append");
            log.close().await;
        }
        let log = PersistentLog::open(&url).await.expect("reopen");
        let rows = log.conversation_between("a", "b", 10).await.expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "durable");
    }

    #[test]
    fn sqlite_path_parsing_skips_memory_urls() {
        assert!(sqlite_path_from_url("sqlite::memory:").is_none());
        assert_eq!(
            sqlite_path_from_url("sqlite://.agent-hub/hub.db?mode=rwc"),
            Some(PathBuf::from(".agent-hub/hub.db"))
        );
        assert!(sqlite_path_from_url("postgres://x").is_none());
    }
}
