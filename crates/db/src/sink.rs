use async_trait::async_trait;
use pipeline::usage::{SessionRecord, SinkError, UsageEvent, UsageSink};
use sqlx::SqlitePool;

use crate::models::{session_record::StoredSessionRecord, usage_event::StoredUsageEvent};

/// Persists accepted usage data into the SQLite store
#[derive(Clone)]
pub struct SqliteUsageSink {
    pool: SqlitePool,
}

impl SqliteUsageSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageSink for SqliteUsageSink {
    async fn store_event(&self, event: &UsageEvent) -> Result<(), SinkError> {
        StoredUsageEvent::create(&self.pool, event)
            .await
            .map(|_| ())
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn store_session(&self, record: &SessionRecord) -> Result<(), SinkError> {
        StoredSessionRecord::upsert(&self.pool, record)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}
