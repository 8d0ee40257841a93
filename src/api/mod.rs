//! Local HTTP status API
//!
//! Lets a UI read the conversation state and message log, follow state changes over a
//! WebSocket, and drive the controller (start/stop capture, retry, typed input, settings).

pub mod conversation;
pub mod health;
pub mod settings;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::Settings;
use crate::conversation::ControllerHandle;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub controller: ControllerHandle,
    /// Settings publisher; the API is one of the settings collaborators
    pub settings: Arc<watch::Sender<Settings>>,
    /// Whether the process was started with voice enabled
    pub voice_enabled: bool,
}

/// API errors
#[derive(Debug)]
pub enum ApiError {
    ControllerStopped,
    BadRequest(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::ControllerStopped => (
                StatusCode::SERVICE_UNAVAILABLE,
                "controller_stopped",
                "conversation controller is not running".to_string(),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}

/// Build the full router
pub fn router(state: ApiState) -> Router {
    let state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(conversation::router(state.clone()))
        .merge(settings::router(state.clone()))
        .merge(health::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: ApiState,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: ApiState, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until the listener fails
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
