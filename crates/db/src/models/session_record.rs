use chrono::{DateTime, Utc};
use pipeline::usage::SessionRecord;
use pipeline::workflow::ExitReason;
use sqlx::{FromRow, SqlitePool};

use crate::error::UsageStoreError;

#[derive(Debug, Clone, FromRow)]
pub struct SessionRecordRow {
    pub session_id: String,
    pub user_id: Option<String>,
    /// JSON array, in visitation order
    pub visited_nodes: String,
    pub completed_nodes: String,
    pub exit_node: Option<String>,
    pub exit_reason: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionRecordRow {
    pub fn into_record(self) -> Result<SessionRecord, UsageStoreError> {
        let parse = |raw: &str| {
            serde_json::from_str::<Vec<String>>(raw).map_err(|e| {
                UsageStoreError::InvalidRow(format!(
                    "session_records row '{}': {}",
                    self.session_id, e
                ))
            })
        };
        let visited_nodes = parse(&self.visited_nodes)?;
        let completed_nodes = parse(&self.completed_nodes)?;
        let exit_reason = self
            .exit_reason
            .parse::<ExitReason>()
            .unwrap_or(ExitReason::Other);

        Ok(SessionRecord {
            session_id: self.session_id,
            user_id: self.user_id,
            visited_nodes,
            completed_nodes,
            exit_node: self.exit_node,
            exit_reason,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

pub struct StoredSessionRecord;

impl StoredSessionRecord {
    /// Insert or replace the record of a session
    pub async fn upsert(pool: &SqlitePool, record: &SessionRecord) -> Result<(), UsageStoreError> {
        let visited = serde_json::to_string(&record.visited_nodes)
            .map_err(|e| UsageStoreError::InvalidRow(e.to_string()))?;
        let completed = serde_json::to_string(&record.completed_nodes)
            .map_err(|e| UsageStoreError::InvalidRow(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO session_records (
                session_id, user_id, visited_nodes, completed_nodes,
                exit_node, exit_reason, started_at, ended_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(session_id) DO UPDATE SET
                user_id = excluded.user_id,
                visited_nodes = excluded.visited_nodes,
                completed_nodes = excluded.completed_nodes,
                exit_node = excluded.exit_node,
                exit_reason = excluded.exit_reason,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(visited)
        .bind(completed)
        .bind(&record.exit_node)
        .bind(record.exit_reason.as_str())
        .bind(record.started_at)
        .bind(record.ended_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        session_id: &str,
    ) -> Result<SessionRecord, UsageStoreError> {
        let row = sqlx::query_as::<_, SessionRecordRow>(
            "SELECT * FROM session_records WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(pool)
        .await?
        .ok_or(UsageStoreError::NotFound)?;

        row.into_record()
    }

    /// Sessions that ended at or after `since`; all sessions when None
    pub async fn find_since(
        pool: &SqlitePool,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>, UsageStoreError> {
        let rows = match since {
            Some(since) => {
                sqlx::query_as::<_, SessionRecordRow>(
                    "SELECT * FROM session_records WHERE ended_at >= ?1 ORDER BY ended_at ASC",
                )
                .bind(since)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SessionRecordRow>(
                    "SELECT * FROM session_records ORDER BY ended_at ASC",
                )
                .fetch_all(pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_record() {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping stored session record: {}", e);
                    None
                }
            })
            .collect())
    }
}
