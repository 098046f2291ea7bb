//! Integration tests: the SSE stream contract — opening frames, roster
//! updates, clear frames and response headers.
use lw_test_utils::SseClient;
use serde_json::{json, Value};
use server::{AppState, Config};
use std::net::SocketAddr;
use std::time::Duration;

async fn spawn_server(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config);
    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn missing_channel_is_400() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let response = reqwest::get(format!("http://{addr}/api/logs/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Channel parameter is required");
}

#[tokio::test]
async fn empty_channel_is_400() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let response = reqwest::get(format!("http://{addr}/api/logs/stream?channel="))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn stream_opens_with_init_ping_then_roster() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let mut sse = SseClient::connect(addr, "/api/logs/stream?channel=default", &[])
        .await
        .unwrap();
    assert_eq!(sse.status(), 200);
    assert!(sse
        .header("content-type")
        .unwrap()
        .starts_with("text/event-stream"));

    let ping = sse.next_event_timeout(EVENT_TIMEOUT).await.unwrap();
    assert_eq!(ping.event, "ping");
    assert_eq!(ping.id.as_deref(), Some("init"));

    let roster = sse.next_event_timeout(EVENT_TIMEOUT).await.unwrap();
    assert_eq!(roster.event, "channels");
    assert_eq!(roster.id.as_deref(), Some("channels"));
    let body: Value = serde_json::from_str(&roster.data).unwrap();
    assert!(body["channels"]
        .as_array()
        .unwrap()
        .contains(&json!("default")));
}

#[tokio::test]
async fn subscribing_to_a_new_channel_includes_it_in_the_roster() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let mut sse = SseClient::connect(addr, "/api/logs/stream?channel=fresh", &[])
        .await
        .unwrap();

    let roster = sse.next_event_of("channels", EVENT_TIMEOUT).await.unwrap();
    let body: Value = serde_json::from_str(&roster.data).unwrap();
    let channels = body["channels"].as_array().unwrap();
    assert!(channels.contains(&json!("fresh")));
    assert!(channels.contains(&json!("default")));
}

#[tokio::test]
async fn publish_to_new_channel_announces_channel_added() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let mut watcher = SseClient::connect(addr, "/api/logs/stream?channel=default", &[])
        .await
        .unwrap();
    // Drain the opening frames first.
    watcher.next_event_of("channels", EVENT_TIMEOUT).await.unwrap();

    reqwest::Client::new()
        .post(format!("http://{addr}/api/logs"))
        .header("X-Channel", "deploys")
        .json(&json!({"msg": "started"}))
        .send()
        .await
        .unwrap();

    let added = watcher
        .next_event_of("channelAdded", EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(added.id.as_deref(), Some("channel-deploys"));
    let body: Value = serde_json::from_str(&added.data).unwrap();
    assert_eq!(body["channel"], "deploys");
}

#[tokio::test]
async fn clearing_logs_sends_clear_frame_and_keeps_stream_open() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let mut sse = SseClient::connect(addr, "/api/logs/stream?channel=default", &[])
        .await
        .unwrap();
    sse.next_event_of("channels", EVENT_TIMEOUT).await.unwrap();

    let response = reqwest::Client::new()
        .delete(format!("http://{addr}/api/logs?channel=default"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"success": true, "channel": "default"}));

    let clear = sse.next_event_of("clear", EVENT_TIMEOUT).await.unwrap();
    let body: Value = serde_json::from_str(&clear.data).unwrap();
    assert_eq!(body["channel"], "default");

    // Still streaming: a publish after the clear arrives normally.
    reqwest::Client::new()
        .post(format!("http://{addr}/api/logs"))
        .json(&json!({"msg": "after clear"}))
        .send()
        .await
        .unwrap();
    let event = sse.next_event_of("log", EVENT_TIMEOUT).await.unwrap();
    assert!(event.data.contains("after clear"));
}

#[tokio::test]
async fn stream_response_disables_proxy_buffering() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let sse = SseClient::connect(addr, "/api/logs/stream?channel=default", &[])
        .await
        .unwrap();
    assert_eq!(sse.header("cache-control"), Some("no-cache"));
    assert_eq!(sse.header("x-accel-buffering"), Some("no"));
}

#[tokio::test]
async fn security_headers_are_on_every_response() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        headers.get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
    assert!(headers.get("content-security-policy").is_none());
}

#[tokio::test]
async fn production_mode_adds_csp() {
    let config = Config {
        production: true,
        ..Config::default()
    };
    let (addr, _state) = spawn_server(config).await;
    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert!(response.headers().get("content-security-policy").is_some());
}

#[tokio::test]
async fn stats_reports_connections_and_channels() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let _sse = SseClient::connect(addr, "/api/logs/stream?channel=default", &[])
        .await
        .unwrap();

    reqwest::Client::new()
        .post(format!("http://{addr}/api/logs"))
        .json(&json!({"msg": "x"}))
        .send()
        .await
        .unwrap();

    let stats: Value = reqwest::get(format!("http://{addr}/api/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["connections"]["active"], 1);
    assert_eq!(stats["connections"]["byChannel"]["default"], 1);
    let list = stats["channels"]["list"].as_array().unwrap();
    let default = list
        .iter()
        .find(|info| info["name"] == "default")
        .expect("default channel in stats");
    assert_eq!(default["logCount"], 1);
}

#[tokio::test]
async fn health_is_alive_and_counts() {
    let (addr, _state) = spawn_server(Config::default()).await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["channels"], 1);
    assert_eq!(body["connections"], 0);
}
