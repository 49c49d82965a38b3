//! Periodic reconciliation
//!
//! One task walks the store on a fixed period and drives the persisted
//! state toward OS truth:
//!
//! - RUNNING channels whose pid no longer exists are handed to the
//!   supervisor as unexpected exits (ERROR, then auto-restart within
//!   budget)
//! - RUNNING channels with no pid at all are corrected to STOPPED
//! - channels mid-restart are skipped, but a restart that has not
//!   advanced within its timeout is demoted to ERROR
//!
//! The store is re-read inside each decision; a status that changed
//! since the walk began wins over the stale snapshot.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ChannelStatus;
use crate::monitor::{cmdline_matches, pid_alive};
use crate::store::Store;
use crate::supervisor::Supervisor;

/// Reconciliation loop handle.
pub struct HealthMonitor {
    store: Arc<Store>,
    supervisor: Arc<Supervisor>,
    period: Duration,
}

impl HealthMonitor {
    pub fn new(store: Arc<Store>, supervisor: Arc<Supervisor>, period_ms: u64) -> Self {
        Self {
            store,
            supervisor,
            period: Duration::from_millis(period_ms),
        }
    }

    /// Spawn the loop; it stops when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; reconcile right away so
            // stale state from a previous run is corrected at boot.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("health loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.reconcile().await;
                    }
                }
            }
        })
    }

    /// One reconciliation pass.
    pub async fn reconcile(&self) {
        self.supervisor.demote_stale_restarts();

        let running = match self.store.list_channels_with_status(ChannelStatus::Running) {
            Ok(channels) => channels,
            Err(e) => {
                warn!("health loop could not list channels: {}", e);
                return;
            }
        };

        for channel in running {
            if self.supervisor.is_restarting(channel.id) {
                continue;
            }

            match channel.pid {
                None => {
                    // Running with no pid is a corrupted record; settle
                    // on STOPPED.
                    warn!(channel_id = %channel.id, "running channel has no pid, correcting to stopped");
                    if let Err(e) =
                        self.store
                            .set_status_and_pid(channel.id, ChannelStatus::Stopped, None)
                    {
                        warn!(channel_id = %channel.id, "could not correct status: {}", e);
                    }
                }
                Some(pid) => {
                    let owned = self.supervisor.slot(channel.id).is_some();
                    if pid_alive(pid) && owned {
                        continue;
                    }
                    if pid_alive(pid)
                        && !owned
                        && cmdline_matches(pid, self.supervisor.encoder_program())
                    {
                        // Orphan encoder from a previous run: reclaim the
                        // pid before treating the channel as exited. A pid
                        // recycled to an unrelated process is left alone.
                        warn!(channel_id = %channel.id, pid, "terminating unowned encoder process");
                        let _ = nix::sys::signal::kill(
                            nix::unistd::Pid::from_raw(pid as i32),
                            nix::sys::signal::Signal::SIGTERM,
                        );
                    }
                    // Re-read before acting; an operator may have stopped
                    // the channel while we walked the list.
                    match self.store.get_channel(channel.id) {
                        Ok(fresh) if fresh.status == ChannelStatus::Running => {
                            self.supervisor.handle_vanished(channel.id).await;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
