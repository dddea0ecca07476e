use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::UiConfig;
use crate::services::ChatOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub ui: Arc<UiConfig>,
    /// Display name of the selected provider.
    pub provider_name: Arc<str>,
}

impl AppState {
    pub fn new(orchestrator: ChatOrchestrator, ui: UiConfig, provider_name: &str) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            ui: Arc::new(ui),
            provider_name: Arc::from(provider_name),
        }
    }
}

impl FromRef<AppState> for Arc<ChatOrchestrator> {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<UiConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.ui.clone()
    }
}
