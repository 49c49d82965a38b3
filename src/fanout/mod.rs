//! Subscription fanout
//!
//! Pushes periodic channel snapshots to subscribers. A subscriber
//! registers once (obtaining its receive side), then issues the two
//! follow verbs: follow one channel or follow all channels. Each follow
//! runs its own push timer; unfollow tears the timer down and a
//! disconnect drains everything the subscriber owned.
//!
//! Pushes never block the fanout: each subscriber has a bounded buffer
//! and snapshots are dropped when it is full.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::FanoutConfig;
use crate::error::{Error, Result};
use crate::monitor::{BitrateSource, MetricRecord, ProcessMonitor, ProcessStats};
use crate::store::Store;
use crate::supervisor::Supervisor;

/// Combined view of one channel at an instant: the persisted record,
/// live process statistics, and the latest parsed metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub process: Option<ProcessStats>,
    pub metrics: Option<MetricRecord>,
    pub generated_at: DateTime<Utc>,
}

/// One delivery to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatsPush {
    /// Produced by a follow-one subscription
    Channel(Box<ChannelSnapshot>),
    /// Produced by a follow-all subscription
    All(Vec<ChannelSnapshot>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FollowKey {
    Channel(Uuid),
    All,
}

struct Subscriber {
    tx: mpsc::Sender<StatsPush>,
    follows: HashMap<FollowKey, JoinHandle<()>>,
}

/// Snapshot fanout with per-subscriber push timers.
pub struct StatsFanout {
    store: Arc<Store>,
    supervisor: Arc<Supervisor>,
    monitor: Arc<ProcessMonitor>,
    push_interval: Duration,
    buffer: usize,
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl StatsFanout {
    pub fn new(
        store: Arc<Store>,
        supervisor: Arc<Supervisor>,
        monitor: Arc<ProcessMonitor>,
        config: &FanoutConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            supervisor,
            monitor,
            push_interval: Duration::from_millis(config.push_interval_ms),
            buffer: config.subscriber_buffer,
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    /// Register a subscriber, returning its receive side. Registering
    /// an existing id drops the previous registration first.
    pub fn register(&self, subscriber_id: &str) -> mpsc::Receiver<StatsPush> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let previous = self.subscribers.lock().insert(
            subscriber_id.to_string(),
            Subscriber {
                tx,
                follows: HashMap::new(),
            },
        );
        if let Some(previous) = previous {
            for (_, task) in previous.follows {
                task.abort();
            }
        }
        rx
    }

    /// Follow one channel: a snapshot every push interval.
    pub fn follow_channel(self: &Arc<Self>, subscriber_id: &str, channel_id: Uuid) -> Result<()> {
        self.install_follow(subscriber_id, FollowKey::Channel(channel_id))
    }

    /// Follow all channels: a snapshot list every push interval.
    pub fn follow_all(self: &Arc<Self>, subscriber_id: &str) -> Result<()> {
        self.install_follow(subscriber_id, FollowKey::All)
    }

    /// Tear down one follow timer.
    pub fn unfollow_channel(&self, subscriber_id: &str, channel_id: Uuid) {
        self.remove_follow(subscriber_id, FollowKey::Channel(channel_id));
    }

    /// Tear down the follow-all timer.
    pub fn unfollow_all(&self, subscriber_id: &str) {
        self.remove_follow(subscriber_id, FollowKey::All);
    }

    /// Drop a subscriber and every timer it owned.
    pub fn disconnect(&self, subscriber_id: &str) {
        if let Some(subscriber) = self.subscribers.lock().remove(subscriber_id) {
            for (_, task) in subscriber.follows {
                task.abort();
            }
        }
    }

    /// Live subscriber count (diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drop every subscriber and cancel all push timers (server
    /// shutdown).
    pub fn shutdown(&self) {
        let subscribers: Vec<Subscriber> = self.subscribers.lock().drain().map(|(_, s)| s).collect();
        for subscriber in subscribers {
            for (_, task) in subscriber.follows {
                task.abort();
            }
        }
    }

    fn install_follow(self: &Arc<Self>, subscriber_id: &str, key: FollowKey) -> Result<()> {
        let mut subscribers = self.subscribers.lock();
        let subscriber = subscribers
            .get_mut(subscriber_id)
            .ok_or_else(|| Error::Validation(format!("unknown subscriber '{}'", subscriber_id)))?;

        // Re-following replaces the existing timer
        if let Some(existing) = subscriber.follows.remove(&key) {
            existing.abort();
        }

        let fanout = Arc::clone(self);
        let tx = subscriber.tx.clone();
        let task = tokio::spawn(async move { fanout.push_loop(key, tx).await });
        subscriber.follows.insert(key, task);
        Ok(())
    }

    fn remove_follow(&self, subscriber_id: &str, key: FollowKey) {
        if let Some(subscriber) = self.subscribers.lock().get_mut(subscriber_id) {
            if let Some(task) = subscriber.follows.remove(&key) {
                task.abort();
            }
        }
    }

    async fn push_loop(self: Arc<Self>, key: FollowKey, tx: mpsc::Sender<StatsPush>) {
        let mut ticker = tokio::time::interval(self.push_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Byte counters from the previous tick, for network-derived
        // bitrate estimation.
        let mut net_history: HashMap<Uuid, (u64, Instant)> = HashMap::new();

        loop {
            ticker.tick().await;

            let push = match key {
                FollowKey::Channel(channel_id) => {
                    match self.snapshot_with_history(channel_id, &mut net_history).await {
                        Ok(snapshot) => StatsPush::Channel(Box::new(snapshot)),
                        Err(e) => {
                            debug!(%channel_id, "follow ended: {}", e);
                            break;
                        }
                    }
                }
                FollowKey::All => {
                    let channels = match self.store.list_channels() {
                        Ok(channels) => channels,
                        Err(e) => {
                            debug!("follow-all skipped a tick: {}", e);
                            continue;
                        }
                    };
                    let mut snapshots = Vec::with_capacity(channels.len());
                    for channel in channels {
                        if let Ok(snapshot) = self
                            .snapshot_with_history(channel.id, &mut net_history)
                            .await
                        {
                            snapshots.push(snapshot);
                        }
                    }
                    StatsPush::All(snapshots)
                }
            };

            // A full buffer drops the push; a closed receiver ends the
            // follow.
            match tx.try_send(push) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("subscriber buffer full, snapshot dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }

    /// Snapshot a channel without network-rate history (service layer).
    pub async fn snapshot(&self, channel_id: Uuid) -> Result<ChannelSnapshot> {
        let mut history = HashMap::new();
        self.snapshot_with_history(channel_id, &mut history).await
    }

    async fn snapshot_with_history(
        &self,
        channel_id: Uuid,
        net_history: &mut HashMap<Uuid, (u64, Instant)>,
    ) -> Result<ChannelSnapshot> {
        let channel = self.store.get_channel(channel_id)?;

        let process = match channel.pid {
            Some(pid) => Some(self.monitor.stats(pid).await),
            None => None,
        };

        // Track output-byte deltas every tick so a fallback estimate is
        // ready when the parser has nothing.
        let network_kbps = process.as_ref().and_then(|stats| {
            let total = stats.tx_bytes;
            let now = Instant::now();
            let previous = net_history.insert(channel_id, (total, now));
            previous.and_then(|(prev_total, prev_at)| {
                let elapsed = now.duration_since(prev_at).as_secs_f64();
                if elapsed > 0.0 && total > prev_total {
                    Some(((total - prev_total) as f64 * 8.0) / (elapsed * 1000.0))
                } else {
                    None
                }
            })
        });

        let mut metrics = self.supervisor.latest_metrics(channel_id);
        if let Some(record) = metrics.as_mut() {
            if record.bitrate_kbps <= 0.0 {
                if let Some(kbps) = network_kbps {
                    record.bitrate_kbps = kbps;
                    record.bitrate_source = BitrateSource::CalculatedFromNetwork;
                } else if let Some(bps) = channel.ffmpeg_params.video_bitrate_bps() {
                    record.bitrate_kbps = bps as f64 / 1000.0;
                    record.bitrate_source = BitrateSource::Configured;
                }
            }
        }

        Ok(ChannelSnapshot {
            channel,
            process,
            metrics,
            generated_at: Utc::now(),
        })
    }
}
