use crate::connections::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Coordinates the orderly drain: background tasks watch the signal and
/// exit, subscribers are cancelled, and the caller waits (bounded) for the
/// connection directory to empty.  Re-entrant `begin` calls are no-ops.
pub struct ShutdownCoordinator {
    signal: watch::Sender<bool>,
    begun: AtomicBool,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal,
            begun: AtomicBool::new(false),
            timeout,
        }
    }

    /// A receiver for background tasks to select on.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.begun.load(Ordering::Acquire)
    }

    /// Flip the signal and cancel every subscriber.  Idempotent.
    pub async fn begin(&self, connections: &ConnectionManager) {
        if self.begun.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.signal.send(true);
        let cancelled = connections.cancel_all().await;
        info!(subscribers = cancelled, "shutdown: subscribers cancelled");
    }

    /// Wait for the directory to empty, bounded by the grace period.
    /// Returns false when the timeout lapsed with subscribers remaining.
    pub async fn drain(&self, connections: &ConnectionManager) -> bool {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let remaining = connections.count().await;
            if remaining == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining, "shutdown grace period lapsed");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Resolves only after shutdown has begun and the grace period has then
    /// fully lapsed.  The serve loop races this against graceful completion
    /// to force-exit a hung drain.
    pub async fn grace_expired(&self) {
        let mut rx = self.signal.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender gone without ever signalling; never force-exit.
                std::future::pending::<()>().await;
            }
        }
        tokio::time::sleep(self.timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connections() -> std::sync::Arc<ConnectionManager> {
        ConnectionManager::new(8, 8, Duration::from_secs(60), 16)
    }

    #[tokio::test]
    async fn begin_cancels_subscribers_and_flips_signal() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let connections = connections();
        let sub = connections.admit("default", "k").await.unwrap();
        let mut rx = coordinator.watch();

        coordinator.begin(&connections).await;
        assert!(coordinator.is_shutting_down());
        assert!(sub.is_cancelled());
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn begin_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let connections = connections();
        coordinator.begin(&connections).await;
        // Admitting after shutdown began: the second begin must not panic or
        // double-signal.
        let sub = connections.admit("default", "k").await.unwrap();
        coordinator.begin(&connections).await;
        assert!(!sub.is_cancelled(), "re-entrant begin is a no-op");
    }

    #[tokio::test]
    async fn drain_returns_true_once_directory_empties() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(2));
        let connections = connections();
        let sub = connections.admit("default", "k").await.unwrap();

        let remover = {
            let connections = std::sync::Arc::clone(&connections);
            let id = sub.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                connections.remove(&id).await;
            })
        };
        assert!(coordinator.drain(&connections).await);
        remover.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_with_stuck_subscribers() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(200));
        let connections = connections();
        connections.admit("default", "k").await.unwrap();
        assert!(!coordinator.drain(&connections).await);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expired_waits_for_begin_then_timeout() {
        let coordinator = std::sync::Arc::new(ShutdownCoordinator::new(Duration::from_secs(5)));
        let connections = connections();

        let grace = {
            let coordinator = std::sync::Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.grace_expired().await })
        };
        // Nothing resolves before the signal.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!grace.is_finished());

        coordinator.begin(&connections).await;
        tokio::time::timeout(Duration::from_secs(10), grace)
            .await
            .expect("grace period should lapse after begin")
            .unwrap();
    }
}
