use axum::{extract::State, response::Html, Json};

use crate::models::chat::UiConfigResponse;
use crate::state::AppState;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn ui_config(State(state): State<AppState>) -> Json<UiConfigResponse> {
    Json(UiConfigResponse::new(&state.ui, &state.provider_name))
}
