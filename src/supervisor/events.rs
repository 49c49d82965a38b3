//! Typed lifecycle event bus
//!
//! The supervisor publishes lifecycle transitions and per-line encoder
//! output as typed events on a bounded broadcast channel. Publishing
//! never blocks: a subscriber that falls behind loses the oldest events
//! (tokio's broadcast lagging semantics) instead of stalling the
//! supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Severity of a channel log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Events emitted by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChannelEvent {
    /// An encoder process came up
    Started { channel_id: Uuid, pid: u32 },
    /// An encoder process went away (normally or via stop)
    Stopped {
        channel_id: Uuid,
        exit_code: Option<i32>,
    },
    /// A lifecycle operation failed or the encoder died abnormally
    Error { channel_id: Uuid, error: String },
    /// One line of encoder output
    Log {
        channel_id: Uuid,
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ChannelEvent {
    pub fn channel_id(&self) -> Uuid {
        match self {
            ChannelEvent::Started { channel_id, .. }
            | ChannelEvent::Stopped { channel_id, .. }
            | ChannelEvent::Error { channel_id, .. }
            | ChannelEvent::Log { channel_id, .. } => *channel_id,
        }
    }

    /// Convenience constructor for log events stamped now.
    pub fn log(channel_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        ChannelEvent::Log {
            channel_id,
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded broadcast bus for [`ChannelEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChannelEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A bus without subscribers swallows the event.
    pub fn publish(&self, event: ChannelEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.publish(ChannelEvent::Started {
            channel_id: id,
            pid: 99,
        });

        match rx.recv().await.unwrap() {
            ChannelEvent::Started { channel_id, pid } => {
                assert_eq!(channel_id, id);
                assert_eq!(pid, 99);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(ChannelEvent::log(Uuid::new_v4(), LogLevel::Info, "hello"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        for i in 0..10 {
            bus.publish(ChannelEvent::log(id, LogLevel::Info, format!("line {}", i)));
        }

        // The receiver lost the oldest events but the publisher never blocked
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            Ok(_) => {}
            Err(e) => panic!("unexpected recv error: {:?}", e),
        }
    }
}
