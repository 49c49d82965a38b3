//! Log persistence subscriber
//!
//! Listens on the event bus and writes channel activity into the
//! store's `channel_logs` table. Store failures are recorded at debug
//! level and swallowed; the log pipeline must never take down the
//! supervisor or the encoder it observes.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::Store;

use super::events::{ChannelEvent, EventBus};

/// Subscribe to the bus and persist events until it closes.
pub fn spawn(store: Arc<Store>, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => persist(&store, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("log persister lagged, {} event(s) dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn persist(store: &Store, event: ChannelEvent) {
    let (channel_id, level, message) = match event {
        ChannelEvent::Started { channel_id, pid } => (
            channel_id,
            "info",
            format!("Encoder started (pid {})", pid),
        ),
        ChannelEvent::Stopped {
            channel_id,
            exit_code: Some(code),
        } => {
            let level = if code == 0 { "info" } else { "warning" };
            (
                channel_id,
                level,
                format!("Encoder exited with code {}", code),
            )
        }
        ChannelEvent::Stopped {
            channel_id,
            exit_code: None,
        } => (channel_id, "info", "Encoder stopped".to_string()),
        ChannelEvent::Error { channel_id, error } => (channel_id, "error", error),
        ChannelEvent::Log {
            channel_id,
            level,
            message,
            ..
        } => (channel_id, level.as_str(), message),
    };

    if let Err(e) = store.insert_log(channel_id, level, &message) {
        debug!(%channel_id, "could not persist channel log: {}", e);
    }
}
