//! Health and status endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::ApiState;
use crate::conversation::ConversationState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness check
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Process status
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub controller_running: bool,
    pub state: ConversationState,
    pub voice_enabled: bool,
    pub voice_available: bool,
    pub has_credential: bool,
    pub wake_word_enabled: bool,
    pub messages: usize,
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let snapshot = state.controller.snapshot();
    let settings = state.settings.borrow().clone();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        controller_running: !state.controller.is_closed(),
        state: snapshot.state,
        voice_enabled: state.voice_enabled,
        voice_available: state.voice_enabled && snapshot.voice_available,
        has_credential: settings.has_credential(),
        wake_word_enabled: settings.wake_word_enabled,
        messages: state.controller.log().len(),
    })
}

/// Build the health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .with_state(state)
}
