use axum::{
    Router,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{IntoMakeService, get},
};
use tower_http::cors::CorsLayer;

use crate::{AppState, middleware as app_middleware};

pub mod graph;
pub mod health;
pub mod sessions;
pub mod stats;
pub mod usage;

/// Prometheus text export
async fn metrics_handler() -> impl IntoResponse {
    match pipeline::metrics::export_metrics() {
        Ok(metrics) => (StatusCode::OK, metrics),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to export metrics: {}", e),
        ),
    }
}

pub fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(graph::router())
        .merge(sessions::router())
        .merge(usage::router())
        .merge(stats::router());

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(middleware::from_fn(app_middleware::request_id_middleware))
        .layer(CorsLayer::permissive())
}

pub fn router(state: AppState) -> IntoMakeService<Router> {
    app(state).into_make_service()
}
