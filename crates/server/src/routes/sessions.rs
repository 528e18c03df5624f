use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::session_record::StoredSessionRecord;
use pipeline::{
    ExecuteStageResponse, ExitReason, Recommendation, SessionInfo, SessionStats, StageInputs,
};
use serde::Deserialize;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ExitSessionRequest {
    pub exit_node: Option<String>,
    pub reason: ExitReason,
}

#[derive(Debug, Default, Deserialize, TS)]
pub struct RecommendationQuery {
    pub rank: Option<bool>,
}

pub async fn start_session(
    State(state): State<AppState>,
    payload: Option<Json<StartSessionRequest>>,
) -> (StatusCode, ResponseJson<ApiResponse<SessionInfo>>) {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let info = state.service().start_session(request.user_id);
    (StatusCode::CREATED, ResponseJson(ApiResponse::success(info)))
}

/// Status reported for a stage outcome; the body carries the stable error code
fn stage_status(response: &ExecuteStageResponse) -> StatusCode {
    match response.error.as_ref().map(|e| e.code.as_str()) {
        None => StatusCode::OK,
        Some("VALIDATION_ERROR") => StatusCode::UNPROCESSABLE_ENTITY,
        Some("CONFIG_ERROR") => StatusCode::NOT_FOUND,
        Some("ALREADY_RUNNING") | Some("CANCELLED") => StatusCode::CONFLICT,
        Some("TRANSPORT_ERROR") | Some("DOMAIN_ERROR") => StatusCode::BAD_GATEWAY,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn execute_stage(
    State(state): State<AppState>,
    Path((session_id, node_id)): Path<(String, String)>,
    payload: Option<Json<StageInputs>>,
) -> (StatusCode, ResponseJson<ExecuteStageResponse>) {
    let inputs = payload.map(|Json(inputs)| inputs).unwrap_or_default();
    let response = state
        .service()
        .execute_stage(&session_id, &node_id, &inputs)
        .await;
    (stage_status(&response), ResponseJson(response))
}

pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<RecommendationQuery>,
) -> ResponseJson<ApiResponse<Vec<Recommendation>>> {
    let rank = query.rank.unwrap_or(false);
    let recommendations = state.service().recommend_next(&session_id, rank);
    ResponseJson(ApiResponse::success(recommendations))
}

pub async fn abort_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    if state.service().abort_session(&session_id) {
        Ok(ResponseJson(ApiResponse::success(())))
    } else {
        Err(ApiError::NotFound(format!("Session '{}' not found", session_id)))
    }
}

pub async fn exit_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ExitSessionRequest>,
) -> Result<ResponseJson<ApiResponse<SessionStats>>, ApiError> {
    let stats = state
        .service()
        .exit_session(&session_id, request.exit_node, request.reason)
        .ok_or_else(|| ApiError::NotFound(format!("Session '{}' not found", session_id)))?;
    Ok(ResponseJson(ApiResponse::success(stats)))
}

/// Live statistics for an open session, the retained record of an ended one,
/// or the persisted record when it has left memory
pub async fn get_session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<SessionStats>>, ApiError> {
    if let Some(stats) = state.service().session_stats(&session_id) {
        return Ok(ResponseJson(ApiResponse::success(stats)));
    }

    match &state.store {
        Some(store) => {
            let record = StoredSessionRecord::find_by_id(&store.pool, &session_id).await?;
            Ok(ResponseJson(ApiResponse::success(SessionStats::from_record(
                &record,
            ))))
        }
        None => Err(ApiError::NotFound(format!("Session '{}' not found", session_id))),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(start_session))
        .route("/sessions/{session_id}/stages/{node_id}", post(execute_stage))
        .route(
            "/sessions/{session_id}/recommendations",
            get(get_recommendations),
        )
        .route("/sessions/{session_id}/abort", post(abort_session))
        .route("/sessions/{session_id}/exit", post(exit_session))
        .route("/sessions/{session_id}/stats", get(get_session_stats))
}
