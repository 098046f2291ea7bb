use crate::subscriber::Subscriber;
use crate::util::now_ms;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    GlobalCap,
    ClientCap,
}

impl AdmitError {
    pub fn message(self) -> &'static str {
        match self {
            AdmitError::GlobalCap => "Maximum connection limit reached",
            AdmitError::ClientCap => "Per-client connection limit reached",
        }
    }
}

/// Aggregate counters for `GET /api/stats`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub active: usize,
    pub dropped_messages: u64,
    pub bytes_sent: u64,
    pub by_channel: Vec<(String, usize)>,
}

#[derive(Default)]
struct Directory {
    subscribers: HashMap<String, Arc<Subscriber>>,
    by_channel: HashMap<String, HashSet<String>>,
    per_client: HashMap<String, usize>,
}

/// The directory of live subscribers.
///
/// Owns every [`Subscriber`]; the bus only looks subscribers up through the
/// channel index, so removing an entry here removes it from fan-out in the
/// same write.  Both caps are checked under the same lock that inserts, so
/// admission never overshoots.
pub struct ConnectionManager {
    inner: RwLock<Directory>,
    max_connections: usize,
    max_per_client: usize,
    stale_timeout_ms: i64,
    max_queue_size: usize,
}

impl ConnectionManager {
    pub fn new(
        max_connections: usize,
        max_per_client: usize,
        stale_timeout: Duration,
        max_queue_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Directory::default()),
            max_connections,
            max_per_client,
            stale_timeout_ms: stale_timeout.as_millis() as i64,
            max_queue_size,
        })
    }

    /// Admit one subscriber for `channel`, or refuse with the cap that was hit.
    pub async fn admit(
        &self,
        channel: &str,
        client_key: &str,
    ) -> Result<Arc<Subscriber>, AdmitError> {
        let mut dir = self.inner.write().await;
        if dir.subscribers.len() >= self.max_connections {
            return Err(AdmitError::GlobalCap);
        }
        if dir.per_client.get(client_key).copied().unwrap_or(0) >= self.max_per_client {
            return Err(AdmitError::ClientCap);
        }
        let subscriber = Arc::new(Subscriber::new(
            Uuid::new_v4().to_string(),
            channel,
            client_key,
            self.max_queue_size,
        ));
        dir.subscribers
            .insert(subscriber.id.clone(), Arc::clone(&subscriber));
        dir.by_channel
            .entry(channel.to_owned())
            .or_default()
            .insert(subscriber.id.clone());
        *dir.per_client.entry(client_key.to_owned()).or_insert(0) += 1;
        Ok(subscriber)
    }

    /// Remove a subscriber and every index entry pointing at it.
    pub async fn remove(&self, id: &str) -> Option<Arc<Subscriber>> {
        let mut dir = self.inner.write().await;
        let subscriber = dir.subscribers.remove(id)?;
        if let Some(ids) = dir.by_channel.get_mut(&subscriber.channel) {
            ids.remove(id);
            if ids.is_empty() {
                dir.by_channel.remove(&subscriber.channel);
            }
        }
        if let Some(count) = dir.per_client.get_mut(&subscriber.client_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                dir.per_client.remove(&subscriber.client_key);
            }
        }
        Some(subscriber)
    }

    pub async fn subscribers_of(&self, channel: &str) -> Vec<Arc<Subscriber>> {
        let dir = self.inner.read().await;
        match dir.by_channel.get(channel) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| dir.subscribers.get(id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub async fn all(&self) -> Vec<Arc<Subscriber>> {
        self.inner.read().await.subscribers.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }

    pub fn is_stale(&self, subscriber: &Subscriber) -> bool {
        now_ms() - subscriber.last_activity() > self.stale_timeout_ms
    }

    /// Raise the cancel signal for one subscriber.
    pub async fn signal_disconnect(&self, id: &str) -> bool {
        match self.inner.read().await.subscribers.get(id) {
            Some(subscriber) => {
                subscriber.cancel();
                true
            }
            None => false,
        }
    }

    /// Raise the cancel signal for every subscriber of `channel`.  Returns
    /// how many were signalled.
    pub async fn signal_channel_disconnect(&self, channel: &str) -> usize {
        let subscribers = self.subscribers_of(channel).await;
        for subscriber in &subscribers {
            subscriber.cancel();
        }
        subscribers.len()
    }

    /// Cancel every live subscriber (shutdown path).
    pub async fn cancel_all(&self) -> usize {
        let subscribers = self.all().await;
        for subscriber in &subscribers {
            subscriber.cancel();
        }
        subscribers.len()
    }

    /// Cancel and remove subscribers idle past the stale timeout.
    ///
    /// An SSE writer stalled on transport backpressure never gets polled, so
    /// it cannot notice its own staleness; this sweep is what reclaims it.
    pub async fn reap_stale(&self) -> usize {
        let stale: Vec<String> = {
            let dir = self.inner.read().await;
            dir.subscribers
                .values()
                .filter(|subscriber| self.is_stale(subscriber))
                .map(|subscriber| subscriber.id.clone())
                .collect()
        };
        let mut reaped = 0;
        for id in stale {
            if let Some(subscriber) = self.remove(&id).await {
                subscriber.cancel();
                reaped += 1;
                tracing::info!(subscriber = %id, "reaped stale subscriber");
            }
        }
        reaped
    }

    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let connections = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => { connections.reap_stale().await; }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    pub async fn stats(&self) -> ConnectionStats {
        let dir = self.inner.read().await;
        let mut by_channel: Vec<(String, usize)> = dir
            .by_channel
            .iter()
            .map(|(channel, ids)| (channel.clone(), ids.len()))
            .collect();
        by_channel.sort();
        ConnectionStats {
            active: dir.subscribers.len(),
            dropped_messages: dir
                .subscribers
                .values()
                .map(|subscriber| subscriber.dropped_messages())
                .sum(),
            bytes_sent: dir
                .subscribers
                .values()
                .map(|subscriber| subscriber.bytes_sent())
                .sum(),
            by_channel,
        }
    }
}
