use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::replay::ReplaySession;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StreamsResponse {
    pub streams: Vec<String>,
}

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Configured stream names, sorted.
pub async fn streams_handler(State(state): State<AppState>) -> Json<StreamsResponse> {
    Json(StreamsResponse {
        streams: state.store.list(),
    })
}

/// Replay a stream from its first record over a websocket.
///
/// The stream is resolved before the upgrade, so an unknown name is a plain
/// `400 Bad Request` and no websocket is ever established.
pub async fn replay_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(stream) = state.store.stream(&name) else {
        debug!(stream = %name, "replay rejected: unknown stream");
        return ServerError::UnknownStream(name).into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!(stream = %name, "replay connection accepted");
    let session = ReplaySession::new(stream, &state);
    // Held until the session ends so shutdown waits for it.
    let token = state.sessions.token();
    ws.on_upgrade(move |socket| async move {
        session.run(socket).await;
        drop(token);
    })
}
