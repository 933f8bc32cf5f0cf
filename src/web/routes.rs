use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::static_files::static_file_router;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Signaling
    let signaling_routes = Router::new()
        .route("/offer", post(handlers::offer))
        .route("/stop", post(handlers::stop));

    let api_routes = Router::new().route("/status", get(handlers::status));

    let static_routes = static_file_router(&state.config.web.static_dir);

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(signaling_routes)
        .nest("/api", api_routes)
        .merge(static_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
