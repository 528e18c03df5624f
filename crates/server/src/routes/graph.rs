use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use pipeline::WorkflowNode;
use utils::response::ApiResponse;

use crate::AppState;

/// The static stage graph, in declaration order
pub async fn get_graph(State(state): State<AppState>) -> ResponseJson<ApiResponse<Vec<WorkflowNode>>> {
    let nodes = state.service().graph().nodes().to_vec();
    ResponseJson(ApiResponse::success(nodes))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/graph", get(get_graph))
}
