use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Token bucket per client key with lazy refill.
///
/// A new key starts at `max_requests - 1` (its first request consumes one
/// token).  On every attempt the bucket is topped up by one full allowance
/// per complete window elapsed since the last refill, capped at the
/// allowance.  Cold buckets are swept periodically so one-off clients do
/// not accumulate.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    max_requests: u32,
    window: Duration,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            buckets: RwLock::new(HashMap::new()),
            max_requests,
            window,
        })
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    /// Take one token for `key`.  Returns false when the bucket is empty.
    pub async fn try_consume(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        match buckets.get_mut(key) {
            None => {
                buckets.insert(
                    key.to_owned(),
                    TokenBucket {
                        tokens: self.max_requests.saturating_sub(1),
                        last_refill: now,
                        last_seen: now,
                    },
                );
                true
            }
            Some(bucket) => {
                let elapsed = now.duration_since(bucket.last_refill);
                let windows = (elapsed.as_millis() / self.window.as_millis().max(1)) as u32;
                if windows > 0 {
                    bucket.tokens = bucket
                        .tokens
                        .saturating_add(windows.saturating_mul(self.max_requests))
                        .min(self.max_requests);
                    bucket.last_refill = now;
                }
                bucket.last_seen = now;
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// How long until the bucket for `key` refills.  Zero for unknown keys.
    pub async fn retry_after(&self, key: &str) -> Duration {
        let buckets = self.buckets.read().await;
        match buckets.get(key) {
            Some(bucket) => self.window.saturating_sub(bucket.last_refill.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Evict buckets idle longer than two windows.  Returns the count evicted.
    pub async fn sweep(&self) -> usize {
        let cutoff = self.window * 2;
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.last_seen.elapsed() <= cutoff);
        before - buckets.len()
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Run the cold-bucket sweep once per window until shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(limiter.window);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let evicted = limiter.sweep().await;
                        if evicted > 0 {
                            debug!(evicted, "rate limiter swept cold buckets");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}
