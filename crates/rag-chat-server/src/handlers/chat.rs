use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::UiConfig;
use crate::models::chat::{ChatRequest, ChatResponse, SessionResponse, TranscriptItem};
use crate::services::ChatOrchestrator;
use crate::utils::error::ApiError;

pub async fn chat_handler(
    State(orchestrator): State<Arc<ChatOrchestrator>>,
    State(ui): State<Arc<UiConfig>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let start_time = Instant::now();
    let session_id = orchestrator.open_session(request.session_id.as_deref());

    info!(
        "Chat request: session={}, question_len={}",
        session_id,
        request.question.len()
    );

    let entry = orchestrator
        .submit(&session_id, &request.question)
        .await
        .map_err(|err| {
            if !err.is_turn_failure() {
                warn!("Question rejected for session {}: {}", session_id, err);
            }
            ApiError::from(err)
        })?;

    info!(
        "Answered session={} in {}ms",
        session_id,
        start_time.elapsed().as_millis()
    );

    Ok(Json(ChatResponse {
        session_id,
        entry: TranscriptItem::from_entry(entry, ui.show_doc_sources),
    }))
}

pub async fn session_handler(
    State(orchestrator): State<Arc<ChatOrchestrator>>,
    State(ui): State<Arc<UiConfig>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let snapshot = orchestrator.snapshot(&session_id)?;
    Ok(Json(SessionResponse::from_snapshot(
        snapshot,
        ui.show_doc_sources,
    )))
}

pub async fn clear_handler(
    State(orchestrator): State<Arc<ChatOrchestrator>>,
    State(ui): State<Arc<UiConfig>>,
    Path(session_id): Path<String>,
) -> Json<SessionResponse> {
    let snapshot = orchestrator.clear(&session_id);
    Json(SessionResponse::from_snapshot(snapshot, ui.show_doc_sources))
}

