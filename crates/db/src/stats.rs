//! Statistics computed from the persisted raw events

use chrono::{NaiveDate, Utc};
use pipeline::usage::{
    DailyNodeRollup, GroupBy, ResponseSample, StatsOverview, build_overview, window_start,
};
use sqlx::SqlitePool;

use crate::error::UsageStoreError;
use crate::models::{
    daily_node_rollup::StoredDailyRollup, session_record::StoredSessionRecord,
    usage_event::StoredUsageEvent,
};

/// Overview over a trailing window, aggregated in the core from stored events
pub async fn overview(
    pool: &SqlitePool,
    window_days: Option<u32>,
    group_by: GroupBy,
    sample_capacity: usize,
    dropped_events: u64,
) -> Result<StatsOverview, UsageStoreError> {
    let since = window_start(window_days);
    let events = StoredUsageEvent::find_since(pool, since).await?;
    let sessions = StoredSessionRecord::find_since(pool, since).await?;
    let samples = ResponseSample::window(&events, sample_capacity);

    Ok(build_overview(
        window_days,
        &events,
        &samples,
        &sessions,
        group_by,
        dropped_events,
    ))
}

/// Inclusive day range covering the last `days` UTC days, today included
pub fn day_range(days: u32) -> (NaiveDate, NaiveDate) {
    let end = Utc::now().date_naive();
    let span = i64::from(days.max(1) - 1);
    let start = end - chrono::Duration::days(span);
    (start, end)
}

/// Recompute the daily rollups of the last `days` days, then read them back
/// from the table so the caller sees exactly what is stored
pub async fn refresh_daily_rollups(
    pool: &SqlitePool,
    days: u32,
    sample_capacity: usize,
) -> Result<Vec<DailyNodeRollup>, UsageStoreError> {
    let (start, end) = day_range(days);
    StoredDailyRollup::recompute(pool, start, end, sample_capacity).await?;
    StoredDailyRollup::find_range(pool, start, end).await
}
