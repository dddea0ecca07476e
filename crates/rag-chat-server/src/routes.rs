use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

/// Questions are short; anything past this is not a chat message.
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/", get(handlers::ui::index))
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        .route("/api/ui-config", get(handlers::ui::ui_config))
        .route("/api/chat", post(handlers::chat::chat_handler))
        .route("/api/sessions/{id}", get(handlers::chat::session_handler))
        .route("/api/sessions/{id}/clear", post(handlers::chat::clear_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
