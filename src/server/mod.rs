//! Server orchestration
//!
//! `Server` is the composition root: it constructs the store, the
//! capability probe, the event bus, the supervisor, the health loop and
//! the fanout, wires them together, and owns their lifecycles. There
//! are no process-wide singletons; everything the subsystems share is
//! injected here.
//!
//! ```text
//! Server
//!   ├─> Store (channels + channel_logs, SQLite)
//!   ├─> CapabilityProbe (hardware encoder detection, cached)
//!   ├─> EventBus ──▶ LogPersister (bounded channel_logs retention)
//!   ├─> Supervisor (encoder processes, state machine, restart budget)
//!   ├─> HealthMonitor (periodic reconciliation)
//!   ├─> StatsFanout (subscriber snapshot pushes)
//!   └─> ChannelService (operator API facade)
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ChannelService;
use crate::config::Config;
use crate::error::Result;
use crate::fanout::StatsFanout;
use crate::health::HealthMonitor;
use crate::hwaccel::CapabilityProbe;
use crate::monitor::ProcessMonitor;
use crate::store::Store;
use crate::supervisor::{logs, EventBus, Supervisor};

/// The composed media-stream supervisor daemon.
pub struct Server {
    config: Arc<Config>,
    store: Arc<Store>,
    probe: Arc<CapabilityProbe>,
    supervisor: Arc<Supervisor>,
    fanout: Arc<StatsFanout>,
    service: Arc<ChannelService>,
    cancel: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Construct all subsystems. Nothing is running yet; call
    /// [`Self::start`] afterwards.
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let store = Arc::new(Store::open(
            &config.store.path,
            config.logging.max_log_entries_per_channel,
        )?);

        let probe = Arc::new(CapabilityProbe::new(config.encoder.clone()));
        let bus = EventBus::default();

        let supervisor = Supervisor::new(
            config.supervisor.clone(),
            config.encoder.clone(),
            config.media.base_path.clone(),
            Arc::clone(&store),
            Arc::clone(&probe),
            bus.clone(),
        );

        let monitor = Arc::new(ProcessMonitor::new());
        let fanout = StatsFanout::new(
            Arc::clone(&store),
            Arc::clone(&supervisor),
            monitor,
            &config.fanout,
        );

        let service = Arc::new(ChannelService::new(
            Arc::clone(&store),
            Arc::clone(&supervisor),
            Arc::clone(&fanout),
            Arc::clone(&probe),
            config.encoder.clone(),
        ));

        Ok(Self {
            config,
            store,
            probe,
            supervisor,
            fanout,
            service,
            cancel: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Operator API facade.
    pub fn service(&self) -> Arc<ChannelService> {
        Arc::clone(&self.service)
    }

    /// Subscription fanout for push surfaces.
    pub fn fanout(&self) -> Arc<StatsFanout> {
        Arc::clone(&self.fanout)
    }

    /// Start background tasks: hardware probe warm-up, log persister,
    /// health loop.
    pub async fn start(&self) {
        let capabilities = self.probe.refresh().await;
        info!(
            "hardware probe: {} accelerator(s) available",
            capabilities.iter().filter(|c| c.available).count()
        );

        let log_task = logs::spawn(Arc::clone(&self.store), self.supervisor.bus());

        let health = HealthMonitor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.supervisor),
            self.config.supervisor.health_check_interval_ms,
        );
        let health_task = health.spawn(self.cancel.clone());

        let mut background = self.background.lock();
        background.push(log_task);
        background.push(health_task);

        info!(
            "supervisor ready (media root {}, store {})",
            self.config.media.base_path.display(),
            self.config.store.path.display()
        );
    }

    /// Graceful shutdown: stop the health loop, terminate all encoder
    /// children and wait for them, then drain background tasks.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.cancel.cancel();
        self.fanout.shutdown();
        self.supervisor.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        debug!("shutdown complete");
    }
}
