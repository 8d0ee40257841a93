//! Conversation endpoints: state, message log, controller commands, live updates

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use super::{ApiError, ApiState};
use crate::conversation::{Command, Snapshot, Transition};
use crate::history::Message;

/// Typed input from the dashboard
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

/// Incoming WebSocket message from the dashboard
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    StartCapture,
    StopCapture,
    Retry,
    Submit { text: String },
    Ping,
}

/// Outgoing WebSocket message
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Full observable state, sent on connect and on every change
    State { snapshot: Snapshot },
    Transition { transition: Transition },
    Error { code: String, message: String },
    Pong,
}

async fn current_state(State(state): State<Arc<ApiState>>) -> Json<Snapshot> {
    Json(state.controller.snapshot())
}

async fn messages(State(state): State<Arc<ApiState>>) -> Json<Vec<Message>> {
    Json(state.controller.log().messages())
}

async fn submit(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<StatusCode, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text must not be empty"));
    }
    dispatch(&state, Command::Submit(text.to_string())).await
}

async fn clear_messages(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.controller.log().clear();
    StatusCode::NO_CONTENT
}

async fn start_capture(State(state): State<Arc<ApiState>>) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::StartCapture).await
}

async fn stop_capture(State(state): State<Arc<ApiState>>) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::StopCapture).await
}

async fn retry(State(state): State<Arc<ApiState>>) -> Result<StatusCode, ApiError> {
    dispatch(&state, Command::Retry).await
}

async fn dispatch(state: &ApiState, command: Command) -> Result<StatusCode, ApiError> {
    state.controller.send(command).await.map_err(|e| {
        tracing::warn!(error = %e, "command rejected");
        ApiError::ControllerStopped
    })?;
    Ok(StatusCode::ACCEPTED)
}

async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Stream state changes out and accept commands in
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<WsOutgoing>(32);

    tracing::info!("dashboard connected");

    // WatchStream yields the current snapshot first
    let snapshots = WatchStream::new(state.controller.subscribe())
        .map(|snapshot| WsOutgoing::State { snapshot });
    let transitions = BroadcastStream::new(state.controller.transitions()).filter_map(|t| {
        futures::future::ready(t.ok().map(|transition| WsOutgoing::Transition { transition }))
    });
    let mut updates = futures::stream::select(snapshots, transitions).boxed();

    let mut send_task = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                update = updates.next() => update,
                reply = rx.recv() => reply,
            };
            let Some(msg) = next else { break };
            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if let Some(reply) = handle_message(&text, &state).await {
                        let _ = tx.send(reply).await;
                    }
                }
                WsMessage::Close(_) => {
                    tracing::info!("dashboard closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Apply one client message; returns an optional direct reply
async fn handle_message(text: &str, state: &ApiState) -> Option<WsOutgoing> {
    let incoming: WsIncoming = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return Some(WsOutgoing::Error {
                code: "invalid_message".to_string(),
                message: e.to_string(),
            });
        }
    };

    let command = match incoming {
        WsIncoming::Ping => return Some(WsOutgoing::Pong),
        WsIncoming::StartCapture => Command::StartCapture,
        WsIncoming::StopCapture => Command::StopCapture,
        WsIncoming::Retry => Command::Retry,
        WsIncoming::Submit { text } if text.trim().is_empty() => {
            return Some(WsOutgoing::Error {
                code: "bad_request".to_string(),
                message: "text must not be empty".to_string(),
            });
        }
        WsIncoming::Submit { text } => Command::Submit(text.trim().to_string()),
    };

    match state.controller.send(command).await {
        Ok(()) => None,
        Err(e) => Some(WsOutgoing::Error {
            code: "controller_stopped".to_string(),
            message: e.to_string(),
        }),
    }
}

/// Build the conversation router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/state", get(current_state))
        .route("/api/messages", get(messages).post(submit).delete(clear_messages))
        .route("/api/capture/start", post(start_capture))
        .route("/api/capture/stop", post(stop_capture))
        .route("/api/retry", post(retry))
        .route("/api/ws", get(ws_upgrade))
        .with_state(state)
}
