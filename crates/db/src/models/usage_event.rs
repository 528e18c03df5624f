use chrono::{DateTime, Utc};
use pipeline::usage::{FeedbackKind, UsageEvent, UsageMetric};
use pipeline::workflow::NodeType;
use sqlx::{FromRow, SqlitePool};

use crate::error::UsageStoreError;

/// Stored form of a usage event; the metric is split into kind/value/feedback
#[derive(Debug, Clone, FromRow)]
pub struct UsageEventRow {
    pub id: i64,
    pub session_id: String,
    pub node_id: String,
    pub node_type: Option<String>,
    pub user_id: Option<String>,
    pub kind: String,
    pub value: Option<f64>,
    pub feedback: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn split_metric(metric: &UsageMetric) -> (Option<f64>, Option<&'static str>) {
    match metric {
        UsageMetric::Usage => (None, None),
        UsageMetric::ResponseTime { ms } => (Some(*ms), None),
        UsageMetric::ContentLength { chars } => (Some(*chars), None),
        UsageMetric::Feedback { feedback } => (None, Some(feedback.as_str())),
    }
}

fn parse_feedback(raw: &str) -> Option<FeedbackKind> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

impl UsageEventRow {
    pub fn into_event(self) -> Result<UsageEvent, UsageStoreError> {
        let id = self.id;
        let invalid =
            |what: &str| UsageStoreError::InvalidRow(format!("usage_events row {}: {}", id, what));

        let metric = match (self.kind.as_str(), self.value, self.feedback.as_deref()) {
            ("usage", _, _) => UsageMetric::Usage,
            ("responseTime", Some(ms), _) => UsageMetric::ResponseTime { ms },
            ("contentLength", Some(chars), _) => UsageMetric::ContentLength { chars },
            ("feedback", _, Some(raw)) => UsageMetric::Feedback {
                feedback: parse_feedback(raw).ok_or_else(|| invalid("unknown feedback"))?,
            },
            (kind, _, _) => return Err(invalid(&format!("incomplete '{}' event", kind))),
        };
        let node_type = match self.node_type.as_deref() {
            Some(raw) => Some(raw.parse::<NodeType>().map_err(|e| invalid(&e))?),
            None => None,
        };

        Ok(UsageEvent {
            node_id: self.node_id,
            node_type,
            session_id: self.session_id,
            user_id: self.user_id,
            timestamp: self.timestamp,
            metric,
        })
    }
}

fn decode_rows(rows: Vec<UsageEventRow>) -> Vec<UsageEvent> {
    rows.into_iter()
        .filter_map(|row| match row.into_event() {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Skipping stored usage event: {}", e);
                None
            }
        })
        .collect()
}

pub struct StoredUsageEvent;

impl StoredUsageEvent {
    /// Persist one event, returning its row id
    pub async fn create(pool: &SqlitePool, event: &UsageEvent) -> Result<i64, UsageStoreError> {
        let (value, feedback) = split_metric(&event.metric);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO usage_events (
                session_id, node_id, node_type, user_id, kind, value, feedback, timestamp
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id
            "#,
        )
        .bind(&event.session_id)
        .bind(&event.node_id)
        .bind(event.node_type.map(|t| t.as_str()))
        .bind(&event.user_id)
        .bind(event.metric.kind_str())
        .bind(value)
        .bind(feedback)
        .bind(event.timestamp)
        .fetch_one(pool)
        .await?;

        Ok(id)
    }

    /// Events at or after `since`, oldest first; all events when `since` is None
    pub async fn find_since(
        pool: &SqlitePool,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UsageEvent>, UsageStoreError> {
        let rows = match since {
            Some(since) => {
                sqlx::query_as::<_, UsageEventRow>(
                    r#"
                    SELECT * FROM usage_events
                    WHERE timestamp >= ?1
                    ORDER BY timestamp ASC, id ASC
                    "#,
                )
                .bind(since)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, UsageEventRow>(
                    "SELECT * FROM usage_events ORDER BY timestamp ASC, id ASC",
                )
                .fetch_all(pool)
                .await?
            }
        };

        Ok(decode_rows(rows))
    }

    /// Events in `[start, end)`, oldest first
    pub async fn find_between(
        pool: &SqlitePool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, UsageStoreError> {
        let rows = sqlx::query_as::<_, UsageEventRow>(
            r#"
            SELECT * FROM usage_events
            WHERE timestamp >= ?1 AND timestamp < ?2
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        Ok(decode_rows(rows))
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, UsageStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_events")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::setup_test_pool;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_create_and_read_back_every_kind() {
        let pool = setup_test_pool().await;
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let events = vec![
            UsageEvent::new("draft", "s1", UsageMetric::Usage)
                .with_node_type(NodeType::Draft)
                .with_user(Some("u1".to_string()))
                .at(at),
            UsageEvent::new("draft", "s1", UsageMetric::ResponseTime { ms: 812.5 }).at(at),
            UsageEvent::new("draft", "s1", UsageMetric::ContentLength { chars: 1200.0 }).at(at),
            UsageEvent::new(
                "draft",
                "s1",
                UsageMetric::Feedback { feedback: FeedbackKind::Regenerate },
            )
            .at(at),
        ];
        for event in &events {
            StoredUsageEvent::create(&pool, event).await.unwrap();
        }

        let stored = StoredUsageEvent::find_since(&pool, None).await.unwrap();
        assert_eq!(stored, events);
        assert_eq!(StoredUsageEvent::count(&pool).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_find_since_and_between() {
        let pool = setup_test_pool().await;
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        StoredUsageEvent::create(&pool, &UsageEvent::new("search", "s1", UsageMetric::Usage).at(old))
            .await
            .unwrap();
        StoredUsageEvent::create(&pool, &UsageEvent::new("search", "s2", UsageMetric::Usage).at(recent))
            .await
            .unwrap();

        let since = StoredUsageEvent::find_since(&pool, Some(recent)).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].session_id, "s2");

        let all = StoredUsageEvent::find_since(&pool, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let between = StoredUsageEvent::find_between(&pool, old, recent).await.unwrap();
        assert_eq!(between.len(), 1);
        assert_eq!(between[0].session_id, "s1");
    }

    #[test]
    fn test_incomplete_row_is_rejected() {
        let row = UsageEventRow {
            id: 7,
            session_id: "s1".to_string(),
            node_id: "search".to_string(),
            node_type: None,
            user_id: None,
            kind: "responseTime".to_string(),
            value: None,
            feedback: None,
            timestamp: Utc::now(),
        };
        assert!(matches!(row.into_event(), Err(UsageStoreError::InvalidRow(_))));
    }
}
