use crate::channels::DEFAULT_CHANNEL;
use crate::http::middleware::client_key;
use crate::http::response::{bad_request, invalid_json, payload_too_large, too_many_requests};
use crate::state::AppState;
use crate::validate::{validate_body, ValidateError};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lw_protocol::{IngestAck, IngestRequest};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tracing::debug;

#[derive(Deserialize)]
pub struct LogsQuery {
    pub channel: Option<String>,
}

/// `POST /api/logs`: validate, normalize, hand to the bus.
///
/// The request-level default channel comes from the `X-Channel` header
/// (header wins) or the `channel` query; each record may still override it
/// with its own `channel` field.  The ack echoes the request-level default
/// regardless of per-record overrides.
pub async fn post_logs(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<LogsQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.config.rate_limit_enabled {
        let key = client_key(&state.config, &headers, peer);
        if !state.rate_limiter.try_consume(&key).await {
            let retry_after = state.rate_limiter.retry_after(&key).await;
            debug!(client = %key, "ingest rate limited");
            return too_many_requests(retry_after, state.rate_limiter.limit());
        }
    }

    let value = match validate_body(&body, &state.config) {
        Ok(value) => value,
        Err(ValidateError::InvalidJson) => return invalid_json(),
        Err(ValidateError::PayloadTooLarge(message)) => return payload_too_large(message),
    };
    let Ok(request) = serde_json::from_value::<IngestRequest>(value) else {
        return bad_request("Invalid log record");
    };

    let default_channel = headers
        .get("x-channel")
        .and_then(|value| value.to_str().ok())
        .filter(|channel| !channel.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| query.channel.filter(|channel| !channel.is_empty()))
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_owned());

    let received = match request {
        IngestRequest::Single(record) => {
            let entry = state.normalizer.normalize(record, &default_channel).await;
            state.bus.publish(entry).await;
            1
        }
        IngestRequest::Batch(batch) => {
            let mut entries = Vec::with_capacity(batch.logs.len());
            for record in batch.logs {
                entries.push(state.normalizer.normalize(record, &default_channel).await);
            }
            let received = entries.len();
            state.bus.publish_batch(entries).await;
            received
        }
    };

    (
        StatusCode::CREATED,
        Json(IngestAck {
            received,
            channel: default_channel,
        }),
    )
        .into_response()
}

/// `GET /api/logs`: the broker keeps nothing, but the endpoint shape is part
/// of the client contract, so it answers with an empty page.
pub async fn get_logs(Query(query): Query<LogsQuery>) -> Response {
    let channel = query
        .channel
        .filter(|channel| !channel.is_empty())
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_owned());
    Json(json!({ "logs": [], "count": 0, "channel": channel })).into_response()
}

/// `DELETE /api/logs[?channel=…]`: emit a clear frame and reset counters for
/// one channel or all of them.  Live subscribers stay connected.
pub async fn delete_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let channel = query.channel.filter(|channel| !channel.is_empty());
    state.bus.publish_clear(channel.as_deref()).await;
    state.registry.reset_counts(channel.as_deref()).await;
    let target = channel.unwrap_or_else(|| "all".to_owned());
    debug!(channel = %target, "logs cleared");
    Json(json!({ "success": true, "channel": target })).into_response()
}
