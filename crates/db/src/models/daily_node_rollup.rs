use chrono::{DateTime, NaiveDate, Utc};
use pipeline::usage::{DailyNodeRollup, NodeAggregate, daily_rollups};
use pipeline::workflow::NodeType;
use sqlx::{FromRow, SqlitePool};

use super::usage_event::StoredUsageEvent;
use crate::error::UsageStoreError;

#[derive(Debug, Clone, FromRow)]
pub struct DailyNodeRollupRow {
    pub date: NaiveDate,
    pub node_id: String,
    pub node_type: Option<String>,
    pub usage_count: i64,
    pub sample_count: i64,
    pub avg_response_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub likes: i64,
    pub dislikes: i64,
    pub adopts: i64,
    pub edits: i64,
    pub regenerates: i64,
    pub adoption_rate: f64,
    pub edit_rate: f64,
    pub satisfaction_rate: f64,
    pub avg_content_length: f64,
    pub computed_at: String,
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl From<DailyNodeRollupRow> for DailyNodeRollup {
    fn from(row: DailyNodeRollupRow) -> Self {
        DailyNodeRollup {
            date: row.date,
            aggregate: NodeAggregate {
                key: row.node_id,
                node_type: row.node_type.and_then(|t| t.parse::<NodeType>().ok()),
                usage_count: count(row.usage_count),
                sample_count: count(row.sample_count),
                avg_response_ms: row.avg_response_ms,
                p50_ms: row.p50_ms,
                p95_ms: row.p95_ms,
                p99_ms: row.p99_ms,
                likes: count(row.likes),
                dislikes: count(row.dislikes),
                adopts: count(row.adopts),
                edits: count(row.edits),
                regenerates: count(row.regenerates),
                adoption_rate: row.adoption_rate,
                edit_rate: row.edit_rate,
                satisfaction_rate: row.satisfaction_rate,
                avg_content_length: row.avg_content_length,
            },
        }
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

pub struct StoredDailyRollup;

impl StoredDailyRollup {
    pub async fn upsert(pool: &SqlitePool, rollup: &DailyNodeRollup) -> Result<(), UsageStoreError> {
        let a = &rollup.aggregate;
        sqlx::query(
            r#"
            INSERT INTO daily_node_rollups (
                date, node_id, node_type, usage_count, sample_count,
                avg_response_ms, p50_ms, p95_ms, p99_ms,
                likes, dislikes, adopts, edits, regenerates,
                adoption_rate, edit_rate, satisfaction_rate, avg_content_length,
                computed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
                    datetime('now', 'subsec'))
            ON CONFLICT(date, node_id) DO UPDATE SET
                node_type = excluded.node_type,
                usage_count = excluded.usage_count,
                sample_count = excluded.sample_count,
                avg_response_ms = excluded.avg_response_ms,
                p50_ms = excluded.p50_ms,
                p95_ms = excluded.p95_ms,
                p99_ms = excluded.p99_ms,
                likes = excluded.likes,
                dislikes = excluded.dislikes,
                adopts = excluded.adopts,
                edits = excluded.edits,
                regenerates = excluded.regenerates,
                adoption_rate = excluded.adoption_rate,
                edit_rate = excluded.edit_rate,
                satisfaction_rate = excluded.satisfaction_rate,
                avg_content_length = excluded.avg_content_length,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(rollup.date)
        .bind(&a.key)
        .bind(a.node_type.map(|t| t.as_str()))
        .bind(a.usage_count as i64)
        .bind(a.sample_count as i64)
        .bind(a.avg_response_ms)
        .bind(a.p50_ms)
        .bind(a.p95_ms)
        .bind(a.p99_ms)
        .bind(a.likes as i64)
        .bind(a.dislikes as i64)
        .bind(a.adopts as i64)
        .bind(a.edits as i64)
        .bind(a.regenerates as i64)
        .bind(a.adoption_rate)
        .bind(a.edit_rate)
        .bind(a.satisfaction_rate)
        .bind(a.avg_content_length)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Stored rollups with `start <= date <= end`, oldest day first
    pub async fn find_range(
        pool: &SqlitePool,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyNodeRollup>, UsageStoreError> {
        let rows = sqlx::query_as::<_, DailyNodeRollupRow>(
            r#"
            SELECT * FROM daily_node_rollups
            WHERE date >= ?1 AND date <= ?2
            ORDER BY date ASC, node_id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(DailyNodeRollup::from).collect())
    }

    /// Recompute the rollups of `start..=end` from raw events and store them.
    /// Rollups are never written from anything but the raw events.
    pub async fn recompute(
        pool: &SqlitePool,
        start: NaiveDate,
        end: NaiveDate,
        sample_capacity: usize,
    ) -> Result<Vec<DailyNodeRollup>, UsageStoreError> {
        let end_exclusive = end.succ_opt().unwrap_or(end);
        let events =
            StoredUsageEvent::find_between(pool, day_start(start), day_start(end_exclusive)).await?;

        let rollups = daily_rollups(&events, sample_capacity);
        for rollup in &rollups {
            Self::upsert(pool, rollup).await?;
        }

        tracing::debug!(
            "Recomputed {} daily rollup(s) for {}..={}",
            rollups.len(),
            start,
            end
        );
        Ok(rollups)
    }
}
