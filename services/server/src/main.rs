use server::{AppState, Config};
use std::env;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = Config::from_env();
    let bind_addr = config
        .bind_addr
        .clone()
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.port));

    let state = AppState::new(config);
    state.spawn_background();
    let router = server::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "log broker listening");

    let serve = async {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
    };

    tokio::select! {
        result = serve => {
            result.expect("server error");
        }
        () = state.shutdown.grace_expired() => {
            error!("graceful shutdown timed out, forcing exit");
            std::process::exit(1);
        }
    }

    if state.shutdown.drain(&state.connections).await {
        info!("server shut down gracefully");
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), then begins the orderly drain and
/// returns so axum stops accepting new requests.
async fn shutdown_signal(state: AppState) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }

    state.begin_shutdown().await;
}
