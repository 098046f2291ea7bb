use crate::util::now_ms;
use lw_protocol::ChannelSnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// The reserved channel that exists at startup and is never evicted or
/// expired.
pub const DEFAULT_CHANNEL: &str = "default";

/// How often the TTL sweep runs in production.
pub const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Tracks named channels, their activity and counters.
///
/// Channels come into existence implicitly: on first publish and on
/// explicit subscribe.  At the cap the least-recently-active non-reserved
/// channel is evicted; idle channels past the TTL are dropped by a periodic
/// sweep.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, ChannelSnapshot>>,
    max_channels: usize,
    ttl_ms: i64,
}

impl ChannelRegistry {
    pub fn new(max_channels: usize, ttl: Duration) -> Arc<Self> {
        let now = now_ms();
        let mut channels = HashMap::new();
        channels.insert(
            DEFAULT_CHANNEL.to_owned(),
            ChannelSnapshot {
                name: DEFAULT_CHANNEL.to_owned(),
                created_at: now,
                last_activity: now,
                log_count: 0,
            },
        );
        Arc::new(Self {
            channels: RwLock::new(channels),
            max_channels,
            ttl_ms: ttl.as_millis() as i64,
        })
    }

    /// Create the channel or refresh its activity.  Returns true when the
    /// channel was newly created (callers announce `channelAdded` then).
    pub async fn register(&self, name: &str) -> bool {
        let now = now_ms();
        let mut channels = self.channels.write().await;
        if let Some(info) = channels.get_mut(name) {
            info.last_activity = now;
            return false;
        }
        if channels.len() >= self.max_channels {
            let victim = channels
                .values()
                .filter(|info| info.name != DEFAULT_CHANNEL)
                .min_by_key(|info| info.last_activity)
                .map(|info| info.name.clone());
            if let Some(victim) = victim {
                channels.remove(&victim);
                warn!(channel = %victim, "channel cap reached, evicted least-recently-active");
            }
        }
        channels.insert(
            name.to_owned(),
            ChannelSnapshot {
                name: name.to_owned(),
                created_at: now,
                last_activity: now,
                log_count: 0,
            },
        );
        info!(channel = %name, "channel registered");
        true
    }

    pub async fn add_log_count(&self, name: &str, count: u64) {
        let mut channels = self.channels.write().await;
        if let Some(info) = channels.get_mut(name) {
            info.log_count += count;
            info.last_activity = now_ms();
        }
    }

    /// Reset the log counter for one channel, or for all of them.
    pub async fn reset_counts(&self, channel: Option<&str>) {
        let mut channels = self.channels.write().await;
        match channel {
            Some(name) => {
                if let Some(info) = channels.get_mut(name) {
                    info.log_count = 0;
                }
            }
            None => {
                for info in channels.values_mut() {
                    info.log_count = 0;
                }
            }
        }
    }

    /// Drop non-reserved channels idle past the TTL.  Returns the count removed.
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = now_ms() - self.ttl_ms;
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|name, info| name == DEFAULT_CHANNEL || info.last_activity >= cutoff);
        let removed = before - channels.len();
        if removed > 0 {
            debug!(removed, "expired idle channels");
        }
        removed
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn snapshot(&self) -> Vec<ChannelSnapshot> {
        let mut snapshot: Vec<ChannelSnapshot> =
            self.channels.read().await.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
    }

    /// Run the TTL sweep on `interval` until shutdown.
    pub fn spawn_ttl_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => { registry.cleanup_expired().await; }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}
