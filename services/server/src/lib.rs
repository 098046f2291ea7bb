pub mod bus;
pub mod channels;
pub mod config;
pub mod connections;
pub mod http;
pub mod id_pool;
pub mod normalize;
pub mod rate_limit;
pub mod shutdown;
pub mod state;
pub mod subscriber;
pub mod util;
pub mod validate;

pub use config::Config;
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/logs",
            post(http::ingest::post_logs)
                .get(http::ingest::get_logs)
                .delete(http::ingest::delete_logs)
                // The validator owns the payload-size decision and its error
                // envelope; axum's built-in 2 MiB cap would answer first
                // with a bare 413 and ignore MAX_PAYLOAD_SIZE.
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/logs/stream", get(http::stream::stream_logs))
        .route("/logs/disconnect", post(http::control::disconnect_channel))
        .route("/channels", get(http::control::list_channels))
        .route("/generate-key", get(http::control::generate_key))
        .route("/stats", get(http::control::get_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            http::middleware::require_api_key,
        ));

    Router::new()
        .nest("/api", api)
        .route("/health", get(http::control::health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http::middleware::security_headers,
        ))
        .layer(cors_layer(state.config.cors_origin.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!(origin = %origin, "invalid CORS_ORIGIN, allowing any origin");
                AllowOrigin::any()
            }
        },
        None => AllowOrigin::any(),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
