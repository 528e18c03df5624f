use axum::{
    Router, body::Bytes, extract::State, http::StatusCode, response::Json as ResponseJson,
    routing::post,
};
use pipeline::usage::DropReason;
use utils::response::ApiResponse;

use crate::AppState;

/// Accept a usage event. Always 202: invalid events are counted as dropped
/// and never reported back to the caller.
pub async fn record_usage_event(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, ResponseJson<ApiResponse<()>>) {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => state.service().record_raw_usage_event(value),
        Err(e) => state
            .service()
            .usage()
            .drop_event(DropReason::Malformed(e.to_string())),
    }
    (StatusCode::ACCEPTED, ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/usage/events", post(record_usage_event))
}
