pub mod analysis_task;
pub mod chat_task;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod urls;

pub use urls::object_name_from_url;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use rest::{
    analyze_handler, chat_handler, delete_session_handler, health_handler, image_handler,
    list_sessions_handler, session_detail_handler, status_handler,
};
use state::AppState;

/// Builds the photo API router. CORS and Swagger UI are layered on by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    let body_limit = app_state.config.max_upload_bytes;
    Router::new()
        .route("/photo/analyze", post(analyze_handler))
        .route("/photo/analyze/status", get(status_handler))
        .route("/photo/chat", post(chat_handler))
        .route("/photo/sessions", get(list_sessions_handler))
        .route(
            "/photo/sessions/{id}",
            get(session_detail_handler).delete(delete_session_handler),
        )
        .route("/photo/image", get(image_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
