use crate::connections::ConnectionManager;
use crate::http::middleware::client_key;
use crate::http::response::{bad_request, service_unavailable};
use crate::state::AppState;
use crate::subscriber::Subscriber;
use crate::util::now_ms;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures_util::stream;
use lw_protocol::{Frame, FrameKind};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Ping cadence on every stream; staleness cuts off at three missed beats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Retry-After hint handed to clients refused by a connection cap.
const CAP_RETRY_AFTER_SECS: u64 = 5;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub channel: Option<String>,
}

/// `GET /api/logs/stream?channel=NAME`: admit, seed, then stream.
///
/// The response stream is the subscriber's writer loop: it drains the
/// bounded queue into SSE frames and owns the heartbeat tick.  Dropping the
/// stream (client gone, shutdown, admin kick) runs the cleanup guard, which
/// detaches the subscriber from the directory.
pub async fn stream_logs(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let channel = match query.channel.as_deref().map(str::trim) {
        Some(channel) if !channel.is_empty() => channel.to_owned(),
        _ => return bad_request("Channel parameter is required"),
    };
    if state.shutdown.is_shutting_down() {
        return service_unavailable("Server is shutting down", CAP_RETRY_AFTER_SECS);
    }

    let key = client_key(&state.config, &headers, peer);
    let subscriber = match state.connections.admit(&channel, &key).await {
        Ok(subscriber) => subscriber,
        Err(refusal) => {
            info!(channel = %channel, client = %key, reason = refusal.message(), "subscriber refused");
            return service_unavailable(refusal.message(), CAP_RETRY_AFTER_SECS);
        }
    };
    info!(subscriber = %subscriber.id, channel = %channel, "subscriber connected");

    // Subscribing brings the channel into existence like a publish does.
    let created = state.registry.register(&channel).await;

    // Seed the opening frames in order: the init ping, then the roster.
    subscriber
        .enqueue(Frame::new(
            FrameKind::Ping,
            json!({ "time": now_ms() }).to_string(),
            Some("init".to_owned()),
        ))
        .await;
    let names = state.registry.names().await;
    subscriber
        .enqueue(Frame::new(
            FrameKind::Channels,
            json!({ "channels": names }).to_string(),
            Some("channels".to_owned()),
        ))
        .await;
    if created {
        state.bus.announce_channel(&channel).await;
    }

    let guard = DetachGuard {
        subscriber_id: Some(subscriber.id.clone()),
        connections: Arc::clone(&state.connections),
    };
    let context = StreamContext {
        subscriber,
        connections: Arc::clone(&state.connections),
        heartbeat: tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        ),
        _guard: guard,
    };

    let event_stream = stream::unfold(context, |mut context| async move {
        loop {
            if context.subscriber.is_cancelled() {
                debug!(subscriber = %context.subscriber.id, "writer loop closing");
                return None;
            }
            if let Some(frame) = context.subscriber.pop().await {
                context.subscriber.mark_delivered(frame.data.len());
                let mut event = Event::default()
                    .event(frame.kind.as_str())
                    .data(frame.data.as_ref());
                if let Some(id) = &frame.id {
                    event = event.id(id);
                }
                return Some((Ok::<_, Infallible>(event), context));
            }
            tokio::select! {
                () = context.subscriber.notified() => {}
                _ = context.heartbeat.tick() => {
                    if context.connections.is_stale(&context.subscriber) {
                        context.subscriber.cancel();
                        continue;
                    }
                    context
                        .subscriber
                        .enqueue(Frame::new(
                            FrameKind::Ping,
                            json!({ "time": now_ms() }).to_string(),
                            None,
                        ))
                        .await;
                }
            }
        }
    });

    let mut response = Sse::new(event_stream).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    // Tell nginx-style proxies not to buffer the stream.
    response_headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

struct StreamContext {
    subscriber: Arc<Subscriber>,
    connections: Arc<ConnectionManager>,
    heartbeat: tokio::time::Interval,
    _guard: DetachGuard,
}

/// Detaches the subscriber when the stream is dropped, whichever path ended
/// it.  Cancel is latched first so a concurrent publisher stops enqueueing.
struct DetachGuard {
    subscriber_id: Option<String>,
    connections: Arc<ConnectionManager>,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        if let Some(id) = self.subscriber_id.take() {
            let connections = Arc::clone(&self.connections);
            tokio::spawn(async move {
                if let Some(subscriber) = connections.remove(&id).await {
                    subscriber.cancel();
                    info!(subscriber = %id, "subscriber detached");
                }
            });
        }
    }
}
