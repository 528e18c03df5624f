use axum::{
    Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use pipeline::usage::{DailyNodeRollup, GroupBy, StatsOverview, daily_rollups};
use serde::Deserialize;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

const DEFAULT_DAILY_DAYS: u32 = 7;

#[derive(Debug, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct OverviewQuery {
    /// Trailing window in days; all time when absent
    pub days: Option<u32>,
    pub group_by: Option<GroupBy>,
}

#[derive(Debug, Default, Deserialize, TS)]
pub struct DailyQuery {
    pub days: Option<u32>,
}

/// Per-node aggregates and session rollup. Reads the durable store when one
/// is configured, the in-memory aggregator otherwise.
pub async fn get_overview(
    State(state): State<AppState>,
    Query(query): Query<OverviewQuery>,
) -> Result<ResponseJson<ApiResponse<StatsOverview>>, ApiError> {
    let group_by = query.group_by.unwrap_or_default();
    let usage = state.service().usage();

    let overview = match &state.store {
        Some(store) => {
            db::stats::overview(
                &store.pool,
                query.days,
                group_by,
                state.sample_capacity,
                usage.dropped_count(),
            )
            .await?
        }
        None => state.service().stats_overview(query.days, group_by),
    };

    Ok(ResponseJson(ApiResponse::success(overview)))
}

/// Daily per-node rollups, recomputed from raw events on every call
pub async fn get_daily(
    State(state): State<AppState>,
    Query(query): Query<DailyQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<DailyNodeRollup>>>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_DAILY_DAYS).max(1);

    let rollups = match &state.store {
        Some(store) => {
            db::stats::refresh_daily_rollups(&store.pool, days, state.sample_capacity).await?
        }
        None => {
            let (start, _) = db::stats::day_range(days);
            let since = start.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            let events = state.service().usage().events_since(since);
            daily_rollups(&events, state.sample_capacity)
        }
    };

    Ok(ResponseJson(ApiResponse::success(rollups)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats/overview", get(get_overview))
        .route("/stats/daily", get(get_daily))
}
