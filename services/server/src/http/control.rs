use crate::http::response::bad_request;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// `GET /api/channels`: the current roster.
pub async fn list_channels(State(state): State<AppState>) -> Response {
    Json(json!({ "channels": state.registry.names().await })).into_response()
}

#[derive(Deserialize)]
pub struct GenerateKeyQuery {
    pub length: Option<usize>,
}

const KEY_LENGTH_MIN: usize = 16;
const KEY_LENGTH_MAX: usize = 64;
const KEY_LENGTH_DEFAULT: usize = 32;

/// `GET /api/generate-key?length=N`: N random bytes (clamped to [16, 64]),
/// base64url without padding.
pub async fn generate_key(Query(query): Query<GenerateKeyQuery>) -> Response {
    let length = query
        .length
        .unwrap_or(KEY_LENGTH_DEFAULT)
        .clamp(KEY_LENGTH_MIN, KEY_LENGTH_MAX);
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    Json(json!({ "key": URL_SAFE_NO_PAD.encode(bytes) })).into_response()
}

/// `GET /api/stats`: connection and channel summaries, including the
/// viewer-facing drop counter.
pub async fn get_stats(State(state): State<AppState>) -> Response {
    let connections = state.connections.stats().await;
    let channels = state.registry.snapshot().await;
    let by_channel: serde_json::Map<String, serde_json::Value> = connections
        .by_channel
        .iter()
        .map(|(channel, count)| (channel.clone(), json!(count)))
        .collect();
    Json(json!({
        "connections": {
            "active": connections.active,
            "limit": state.config.max_connections,
            "droppedMessages": connections.dropped_messages,
            "bytesSent": connections.bytes_sent,
            "byChannel": by_channel,
        },
        "channels": {
            "count": channels.len(),
            "limit": state.config.max_channels,
            "list": channels,
        },
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct DisconnectQuery {
    pub channel: Option<String>,
}

/// `POST /api/logs/disconnect?channel=…`: raise the cancel signal for every
/// subscriber of the channel.
pub async fn disconnect_channel(
    State(state): State<AppState>,
    Query(query): Query<DisconnectQuery>,
) -> Response {
    let Some(channel) = query.channel.filter(|channel| !channel.is_empty()) else {
        return bad_request("Channel parameter is required");
    };
    let closed = state.connections.signal_channel_disconnect(&channel).await;
    info!(channel = %channel, closed, "admin disconnect");
    Json(json!({ "channel": channel, "closedConnections": closed })).into_response()
}

/// `GET /health`: liveness outside the API-key gate.
pub async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "ok",
        "uptime": state.uptime_secs(),
        "connections": state.connections.count().await,
        "channels": state.registry.len().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}
