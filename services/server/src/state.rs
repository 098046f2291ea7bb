use crate::bus::Bus;
use crate::channels::{ChannelRegistry, TTL_SWEEP_INTERVAL};
use crate::config::Config;
use crate::connections::ConnectionManager;
use crate::id_pool::IdPool;
use crate::normalize::Normalizer;
use crate::rate_limit::RateLimiter;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Instant;

/// How often the stale-subscriber reaper runs; one heartbeat interval.
pub const REAPER_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

/// Everything the handlers need, wired once at startup.
///
/// The singletons reference each other only through this explicit wiring
/// (the bus looks up subscribers through the connection manager, nothing
/// holds a back-pointer); teardown happens in reverse construction order
/// via the shutdown coordinator.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub id_pool: Arc<IdPool>,
    pub normalizer: Arc<Normalizer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub registry: Arc<ChannelRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub bus: Arc<Bus>,
    pub shutdown: Arc<ShutdownCoordinator>,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let id_pool = IdPool::new();
        let normalizer = Arc::new(Normalizer::new(Arc::clone(&id_pool)));
        let rate_limiter = RateLimiter::new(config.rate_limit_max, config.rate_limit_window);
        let registry = ChannelRegistry::new(config.max_channels, config.channel_ttl);
        let connections = ConnectionManager::new(
            config.max_connections,
            config.max_per_client,
            config.stale_timeout,
            config.max_queue_size,
        );
        let bus = Bus::new(Arc::clone(&registry), Arc::clone(&connections));
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout));
        Self {
            config: Arc::new(config),
            id_pool,
            normalizer,
            rate_limiter,
            registry,
            connections,
            bus,
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Start the periodic sweeps.  Each task exits when the shutdown signal
    /// flips.
    pub fn spawn_background(&self) {
        self.rate_limiter.spawn_sweeper(self.shutdown.watch());
        self.registry
            .spawn_ttl_sweeper(TTL_SWEEP_INTERVAL, self.shutdown.watch());
        self.connections
            .spawn_reaper(REAPER_INTERVAL, self.shutdown.watch());
    }

    pub async fn begin_shutdown(&self) {
        self.shutdown.begin(&self.connections).await;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_state_wires_defaults() {
        let state = AppState::new(Config::default());
        assert!(state.registry.contains("default").await);
        assert_eq!(state.connections.count().await, 0);
        assert!(!state.shutdown.is_shutting_down());
        assert_eq!(state.rate_limiter.limit(), 1000);
    }

    #[tokio::test]
    async fn begin_shutdown_cancels_live_subscribers() {
        let state = AppState::new(Config::default());
        let sub = state.connections.admit("default", "k").await.unwrap();
        state.begin_shutdown().await;
        assert!(sub.is_cancelled());
        assert!(state.shutdown.is_shutting_down());
    }
}
