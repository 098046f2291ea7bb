use crate::channels::ChannelRegistry;
use crate::connections::ConnectionManager;
use lw_protocol::{Frame, FrameKind, LogEntry};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Routes entries to per-channel subscriber fan-out.
///
/// Each publish serializes its payload exactly once; subscribers of the
/// target channel share the serialization through the frame's `Arc<str>`.
/// Fan-out is a non-blocking enqueue per subscriber, so a slow consumer
/// never stalls the publisher or its siblings.
pub struct Bus {
    registry: Arc<ChannelRegistry>,
    connections: Arc<ConnectionManager>,
}

impl Bus {
    pub fn new(registry: Arc<ChannelRegistry>, connections: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            connections,
        })
    }

    pub async fn publish(&self, entry: LogEntry) {
        let channel = entry.channel.clone();
        self.deliver(&channel, vec![entry]).await;
    }

    /// Publish a batch.  Entries sharing one channel ship as a single
    /// `batch` frame; a mixed batch is partitioned by channel and each
    /// partition delivered separately, preserving per-channel order.
    pub async fn publish_batch(&self, entries: Vec<LogEntry>) {
        let mut partitions: HashMap<String, Vec<LogEntry>> = HashMap::new();
        for entry in entries {
            partitions
                .entry(entry.channel.clone())
                .or_default()
                .push(entry);
        }
        for (channel, partition) in partitions {
            self.deliver(&channel, partition).await;
        }
    }

    async fn deliver(&self, channel: &str, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        if self.registry.register(channel).await {
            self.announce_channel(channel).await;
        }
        self.registry
            .add_log_count(channel, entries.len() as u64)
            .await;

        let frame = match serialize_partition(&entries) {
            Ok(frame) => frame,
            Err(err) => {
                // A normalized entry that fails to serialize would be a bug,
                // but one bad entry must not halt the bus.
                error!(channel = %channel, error = %err, "dropping unserializable publish");
                return;
            }
        };

        let subscribers = self.connections.subscribers_of(channel).await;
        debug!(
            channel = %channel,
            entries = entries.len(),
            subscribers = subscribers.len(),
            "publishing"
        );
        for subscriber in subscribers {
            subscriber.enqueue(frame.clone()).await;
        }
    }

    /// Tell every live subscriber that a channel now exists.
    pub async fn announce_channel(&self, name: &str) {
        let data = json!({ "channel": name }).to_string();
        let frame = Frame::new(FrameKind::ChannelAdded, data, Some(format!("channel-{name}")));
        for subscriber in self.connections.all().await {
            subscriber.enqueue(frame.clone()).await;
        }
    }

    /// Tell subscribers of `channel` (or everyone) that the channel was
    /// cleared so viewers can wipe their panes.
    pub async fn publish_clear(&self, channel: Option<&str>) {
        let target = channel.unwrap_or("all");
        let data = json!({ "channel": target }).to_string();
        let frame = Frame::new(FrameKind::Clear, data, Some("clear".to_owned()));
        let subscribers = match channel {
            Some(name) => self.connections.subscribers_of(name).await,
            None => self.connections.all().await,
        };
        for subscriber in subscribers {
            subscriber.enqueue(frame.clone()).await;
        }
    }
}

fn serialize_partition(entries: &[LogEntry]) -> Result<Frame, serde_json::Error> {
    if entries.len() == 1 {
        let json = serde_json::to_string(&entries[0])?;
        Ok(Frame::new(FrameKind::Log, json, Some(entries[0].id.clone())))
    } else {
        let json = serde_json::to_string(entries)?;
        Ok(Frame::new(FrameKind::Batch, json, Some(entries[0].id.clone())))
    }
}
