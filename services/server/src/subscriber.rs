use crate::util::now_ms;
use lw_protocol::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};

/// One live SSE connection.
///
/// Holds the bounded outbound queue; the writer loop in the stream handler
/// drains it.  Enqueue never waits for the consumer: at capacity the oldest
/// frame is dropped and counted, so a slow viewer sees the freshest logs.
/// Cancellation is a latch; firing it from any path converges on the same
/// cleanup.
#[derive(Debug)]
pub struct Subscriber {
    pub id: String,
    pub channel: String,
    pub client_key: String,
    pub created_at: i64,
    max_queue: usize,
    queue: Mutex<VecDeque<Frame>>,
    notify: Notify,
    cancelled: AtomicBool,
    last_activity: AtomicI64,
    bytes_sent: AtomicU64,
    dropped: AtomicU64,
}

impl Subscriber {
    pub fn new(id: String, channel: &str, client_key: &str, max_queue: usize) -> Self {
        let now = now_ms();
        Self {
            id,
            channel: channel.to_owned(),
            client_key: client_key.to_owned(),
            created_at: now,
            max_queue: max_queue.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cancelled: AtomicBool::new(false),
            last_activity: AtomicI64::new(now),
            bytes_sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a frame, dropping the oldest when full, and wake the writer.
    pub async fn enqueue(&self, frame: Frame) {
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.max_queue {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<Frame> {
        self.queue.lock().await.pop_front()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Wait until a frame arrives or the subscriber is cancelled.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Latch the cancel signal.  Idempotent; wakes the writer so it can
    /// observe the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Record a delivered frame: activity timestamp and byte accounting.
    pub fn mark_delivered(&self, bytes: usize) {
        self.last_activity.store(now_ms(), Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
