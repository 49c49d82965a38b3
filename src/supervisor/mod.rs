//! Process lifecycle supervision
//!
//! The supervisor owns the living set of encoder processes and drives
//! each channel's OS state toward its declared status with strict
//! state-machine discipline:
//!
//! ```text
//! STOPPED ──start──▶ RUNNING
//! RUNNING ──stop──▶ STOPPED
//! RUNNING ──exit(code≠0)──▶ ERROR ──auto_restart+budget──▶ RESTARTING ──▶ RUNNING
//! RUNNING ──exit(code=0)──▶ STOPPED
//! any     ──restart──▶ RESTARTING ──▶ RUNNING | ERROR
//! ```
//!
//! Concurrency rules:
//! - all transitions for one channel serialize on a per-channel async
//!   mutex; across channels nothing is ordered
//! - RESTARTING is an exclusion flag: a second restart for the same
//!   channel is a conflict, and a flag that has not advanced within the
//!   configured timeout is demoted to ERROR by the health loop
//! - the slot table lock is never held across I/O; process signalling,
//!   store writes and file operations happen outside it
//!
//! Process termination is two-phase: SIGTERM, a bounded grace wait,
//! then SIGKILL.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod budget;
pub mod events;
pub mod logs;
pub mod slot;

pub use budget::RestartBudget;
pub use events::{ChannelEvent, EventBus, LogLevel};
pub use slot::ProcessSlot;

use crate::channel::ChannelStatus;
use crate::command::CommandBuilder;
use crate::config::{EncoderConfig, SupervisorConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::hwaccel::CapabilityProbe;
use crate::monitor::{cmdline_matches, pid_alive, MetricRecord, ProgressParser};
use crate::store::Store;

/// Pause between the stop and start halves of a restart, giving the
/// input a moment to settle and operators a window to intervene.
const RESTART_SETTLE: Duration = Duration::from_millis(500);

/// Poll interval while waiting for a signalled child to go away.
const EXIT_POLL: Duration = Duration::from_millis(25);

/// Owns and supervises all running encoder processes.
pub struct Supervisor {
    timing: SupervisorConfig,
    encoder_config: EncoderConfig,
    media_root: PathBuf,
    store: Arc<Store>,
    probe: Arc<CapabilityProbe>,
    bus: EventBus,
    /// Active slot table; channel id → live process record
    slots: RwLock<HashMap<Uuid, ProcessSlot>>,
    /// Per-channel serialization primitives for start/stop/restart
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    /// Channels currently inside a restart, with entry time
    restarting: Mutex<HashMap<Uuid, Instant>>,
    /// Channels whose next exit was requested by us (stop/shutdown)
    expected_exits: Mutex<HashSet<Uuid>>,
    budget: RestartBudget,
    parser: Mutex<ProgressParser>,
}

impl Supervisor {
    pub fn new(
        timing: SupervisorConfig,
        encoder_config: EncoderConfig,
        media_root: PathBuf,
        store: Arc<Store>,
        probe: Arc<CapabilityProbe>,
        bus: EventBus,
    ) -> Arc<Self> {
        let budget = RestartBudget::new(
            timing.restart_max_attempts,
            Duration::from_secs(timing.restart_window_secs),
        );
        Arc::new(Self {
            timing,
            encoder_config,
            media_root,
            store,
            probe,
            bus,
            slots: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            restarting: Mutex::new(HashMap::new()),
            expected_exits: Mutex::new(HashSet::new()),
            budget,
            parser: Mutex::new(ProgressParser::new()),
        })
    }

    /// The event bus this supervisor publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The encoder program channels are spawned from.
    pub fn encoder_program(&self) -> &str {
        &self.encoder_config.ffmpeg_path
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Start a channel's encoder. Fails with a conflict when a live slot
    /// already exists or a restart is in flight for the channel.
    pub async fn start(self: &Arc<Self>, channel_id: Uuid) -> Result<u32> {
        let lock = self.channel_lock(channel_id);
        let _guard = lock.lock().await;
        self.start_locked(channel_id, false).await
    }

    /// Stop a channel's encoder, optionally purging its media directory.
    pub async fn stop(self: &Arc<Self>, channel_id: Uuid, clean_files: bool) -> Result<()> {
        let lock = self.channel_lock(channel_id);
        let _guard = lock.lock().await;
        self.stop_locked(channel_id, StopMode::Operator { clean_files })
            .await
    }

    /// Restart a channel. Serialized with itself per channel: a second
    /// restart while one is in flight is a conflict.
    pub async fn restart(self: &Arc<Self>, channel_id: Uuid) -> Result<u32> {
        self.restart_inner(channel_id).await
    }

    // =========================================================================
    // Introspection (health loop, fanout, service layer)
    // =========================================================================

    /// Latest parsed metric record for a channel.
    pub fn latest_metrics(&self, channel_id: Uuid) -> Option<MetricRecord> {
        self.slots
            .read()
            .get(&channel_id)
            .and_then(|slot| slot.metrics.clone())
    }

    /// Copy of the live slot for a channel.
    pub fn slot(&self, channel_id: Uuid) -> Option<ProcessSlot> {
        self.slots.read().get(&channel_id).cloned()
    }

    /// Channel ids with a live slot.
    pub fn running_channels(&self) -> Vec<Uuid> {
        self.slots.read().keys().copied().collect()
    }

    /// True while a restart is in flight for the channel.
    pub fn is_restarting(&self, channel_id: Uuid) -> bool {
        self.restarting.lock().contains_key(&channel_id)
    }

    /// Auto-restart attempts consumed inside the current window.
    pub fn restart_attempts(&self, channel_id: Uuid) -> u32 {
        self.budget.attempts(channel_id)
    }

    /// Directory owning the channel's output files.
    pub fn channel_dir(&self, channel_id: Uuid) -> PathBuf {
        self.media_root.join(channel_id.to_string())
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// `within_restart` marks the re-spawn half of a restart: it runs
    /// with the RESTARTING flag held, so the exclusion checks below
    /// must not apply to it, and a concurrent operator stop aborts it.
    async fn start_locked(
        self: &Arc<Self>,
        channel_id: Uuid,
        within_restart: bool,
    ) -> Result<u32> {
        // A restart owns the channel from stop to re-spawn, including
        // the settle window where no slot exists; an operator start in
        // that window is a conflict, not a free lane.
        if !within_restart && self.is_restarting(channel_id) {
            return Err(Error::AlreadyRestarting(channel_id));
        }
        if self.slots.read().contains_key(&channel_id) {
            return Err(Error::AlreadyRunning(channel_id));
        }

        let channel = self.store.get_channel(channel_id)?;
        if within_restart && channel.status == ChannelStatus::Stopped {
            debug!(%channel_id, "start aborted: channel was stopped concurrently");
            return Err(Error::NotRunning(channel_id));
        }
        if !within_restart && channel.status == ChannelStatus::Restarting {
            return Err(Error::AlreadyRestarting(channel_id));
        }
        channel.validate()?;

        let dir = self.channel_dir(channel_id);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            let err = Error::Io(e);
            self.fail_start(channel_id, &err);
            return Err(err);
        }

        // Prime the probe cache so command synthesis sees fresh hardware
        // capabilities.
        self.probe.capabilities().await;
        let output = channel.primary_output()?.clone();
        let builder = CommandBuilder::new(&self.encoder_config, &self.probe, &self.media_root);
        let command = match builder.build(&channel, &output) {
            Ok(command) => command,
            Err(e) => {
                self.fail_start(channel_id, &e);
                return Err(e);
            }
        };

        debug!(%channel_id, "spawning encoder: {}", command.display());
        let mut child = match Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let err = Error::Spawn(e);
                self.fail_start(channel_id, &err);
                return Err(err);
            }
        };

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                let err = Error::Internal("spawned child reported no pid".into());
                self.fail_start(channel_id, &err);
                return Err(err);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        self.slots
            .write()
            .insert(channel_id, ProcessSlot::new(pid, command));

        if let Err(e) = self
            .store
            .set_status_and_pid(channel_id, ChannelStatus::Running, Some(pid))
        {
            self.slots.write().remove(&channel_id);
            let _ = child.kill().await;
            return Err(e);
        }

        if let Some(stdout) = stdout {
            let sup = Arc::clone(self);
            tokio::spawn(async move { sup.read_stdout(channel_id, stdout).await });
        }
        if let Some(stderr) = stderr {
            let sup = Arc::clone(self);
            tokio::spawn(async move { sup.read_stderr(channel_id, stderr).await });
        }

        let sup = Arc::clone(self);
        tokio::spawn(async move { sup.wait_for_exit(channel_id, child).await });

        info!(%channel_id, pid, "channel started");
        self.bus
            .publish(ChannelEvent::Started { channel_id, pid });
        Ok(pid)
    }

    /// Roll the persisted status to ERROR and surface the failure.
    /// Caller-side errors (validation, conflicts) never reach here.
    fn fail_start(&self, channel_id: Uuid, error: &Error) {
        warn!(%channel_id, "start failed: {}", error);
        if let Err(e) = self
            .store
            .set_status_and_pid(channel_id, ChannelStatus::Error, None)
        {
            warn!(%channel_id, "could not persist error status: {}", e);
        }
        self.bus.publish(ChannelEvent::Error {
            channel_id,
            error: error.to_string(),
        });
    }

    // =========================================================================
    // Stop
    // =========================================================================

    async fn stop_locked(self: &Arc<Self>, channel_id: Uuid, mode: StopMode) -> Result<()> {
        let slot_pid = self.slots.read().get(&channel_id).map(|slot| slot.pid);
        let channel = self.store.get_channel(channel_id)?;
        let target_pid = slot_pid.or(channel.pid);

        match target_pid {
            // A store pid without a slot is from a previous run; only
            // signal it if it still names our encoder program.
            Some(pid)
                if pid_alive(pid)
                    && (slot_pid.is_some()
                        || cmdline_matches(pid, &self.encoder_config.ffmpeg_path)) =>
            {
                self.expected_exits.lock().insert(channel_id);
                self.signal_and_wait(channel_id, pid, slot_pid.is_some())
                    .await;
            }
            _ => {
                if matches!(mode, StopMode::Operator { .. })
                    && channel.status == ChannelStatus::Stopped
                    && target_pid.is_none()
                {
                    return Err(Error::NotRunning(channel_id));
                }
            }
        }

        self.slots.write().remove(&channel_id);
        self.parser.lock().clear(channel_id);
        self.expected_exits.lock().remove(&channel_id);

        match mode {
            StopMode::Operator { clean_files } => {
                self.store
                    .set_status_and_pid(channel_id, ChannelStatus::Stopped, None)?;
                self.budget.reset(channel_id);
                if clean_files {
                    self.purge_channel_dir(channel_id);
                }
                info!(%channel_id, "channel stopped");
                self.bus.publish(ChannelEvent::Stopped {
                    channel_id,
                    exit_code: None,
                });
            }
            StopMode::ForRestart => {
                self.store
                    .set_status_and_pid(channel_id, ChannelStatus::Restarting, None)?;
            }
        }
        Ok(())
    }

    /// Two-phase termination. When we own a slot the exit watcher
    /// removes it on reap, which is the precise completion signal;
    /// otherwise fall back to liveness polling of the stale pid.
    async fn signal_and_wait(&self, channel_id: Uuid, pid: u32, have_slot: bool) {
        let nix_pid = Pid::from_raw(pid as i32);
        if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
            debug!(%channel_id, pid, "SIGTERM failed: {}", e);
        }
        let gone = self
            .wait_for_exit_signal(channel_id, pid, have_slot, self.timing.term_timeout_ms)
            .await;
        if !gone {
            warn!(%channel_id, pid, "encoder ignored SIGTERM, escalating to SIGKILL");
            let _ = kill(nix_pid, Signal::SIGKILL);
            self.wait_for_exit_signal(channel_id, pid, have_slot, self.timing.kill_timeout_ms)
                .await;
        }
    }

    async fn wait_for_exit_signal(
        &self,
        channel_id: Uuid,
        pid: u32,
        have_slot: bool,
        timeout_ms: u64,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let gone = if have_slot {
                !self.slots.read().contains_key(&channel_id)
            } else {
                !pid_alive(pid)
            };
            if gone {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }

    // =========================================================================
    // Restart
    // =========================================================================

    async fn restart_inner(self: &Arc<Self>, channel_id: Uuid) -> Result<u32> {
        {
            let mut restarting = self.restarting.lock();
            if restarting.contains_key(&channel_id) {
                return Err(Error::AlreadyRestarting(channel_id));
            }
            restarting.insert(channel_id, Instant::now());
        }
        let _flag = RestartingFlag {
            supervisor: Arc::clone(self),
            channel_id,
        };

        let channel = self.store.get_channel(channel_id)?;
        self.store
            .set_status_and_pid(channel_id, ChannelStatus::Restarting, channel.pid)?;

        {
            let lock = self.channel_lock(channel_id);
            let _guard = lock.lock().await;
            self.stop_locked(channel_id, StopMode::ForRestart).await?;
        }

        tokio::time::sleep(RESTART_SETTLE).await;

        // A stop may have landed while we slept; it wins.
        let channel = self.store.get_channel(channel_id)?;
        if channel.status == ChannelStatus::Stopped {
            info!(%channel_id, "restart aborted: channel was stopped concurrently");
            return Err(Error::NotRunning(channel_id));
        }

        self.purge_channel_dir(channel_id);

        let lock = self.channel_lock(channel_id);
        let _guard = lock.lock().await;
        match self.start_locked(channel_id, true).await {
            Ok(pid) => {
                self.budget.reset(channel_id);
                Ok(pid)
            }
            Err(e) => {
                // Environment failures have already rolled the status to
                // ERROR inside start; conflicts (concurrent stop) leave
                // the stop's state in place.
                if e.kind() == ErrorKind::Conflict {
                    return Err(e);
                }
                let _ = self
                    .store
                    .set_status_and_pid(channel_id, ChannelStatus::Error, None);
                Err(e)
            }
        }
    }

    /// Queue an auto-restart after the configured delay. The channel is
    /// re-read at every scheduling boundary; an operator stop or a
    /// competing restart aborts the attempt.
    pub fn schedule_auto_restart(self: &Arc<Self>, channel_id: Uuid) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(sup.timing.restart_delay_ms)).await;

            let channel = match sup.store.get_channel(channel_id) {
                Ok(channel) => channel,
                Err(_) => return,
            };
            if matches!(
                channel.status,
                ChannelStatus::Stopped | ChannelStatus::Restarting
            ) {
                debug!(%channel_id, status = %channel.status, "auto-restart aborted");
                return;
            }
            if !channel.auto_restart {
                return;
            }

            match sup.budget.try_consume(channel_id) {
                Ok(attempt) => {
                    info!(%channel_id, attempt, "auto-restarting channel");
                }
                Err(attempts) => {
                    let err = Error::RestartBudgetExceeded {
                        id: channel_id,
                        attempts,
                        window_secs: sup.budget.window_secs(),
                    };
                    warn!(%channel_id, "{}", err);
                    sup.bus.publish(ChannelEvent::Error {
                        channel_id,
                        error: err.to_string(),
                    });
                    return;
                }
            }

            if let Err(e) = sup.restart_inner(channel_id).await {
                warn!(%channel_id, "auto-restart failed: {}", e);
                // Environment failures retry on the next delay, still
                // bounded by the budget; conflicts mean someone else owns
                // the channel now.
                if matches!(
                    e.kind(),
                    ErrorKind::Resource | ErrorKind::Spawn | ErrorKind::Internal
                ) {
                    sup.schedule_auto_restart(channel_id);
                }
            }
        });
    }

    // =========================================================================
    // Health-loop hooks
    // =========================================================================

    /// A supervised pid disappeared outside a stop: mark the channel
    /// ERROR and queue an auto-restart when configured.
    pub async fn handle_vanished(self: &Arc<Self>, channel_id: Uuid) {
        self.slots.write().remove(&channel_id);
        self.parser.lock().clear(channel_id);

        // Re-read, not cached: only still-RUNNING channels are treated
        // as unexpected exits.
        let channel = match self.store.get_channel(channel_id) {
            Ok(channel) => channel,
            Err(_) => return,
        };
        if channel.status != ChannelStatus::Running {
            return;
        }

        warn!(%channel_id, "supervised process vanished, marking channel error");
        if let Err(e) = self
            .store
            .set_status_and_pid(channel_id, ChannelStatus::Error, None)
        {
            warn!(%channel_id, "could not persist error status: {}", e);
            return;
        }
        self.bus.publish(ChannelEvent::Error {
            channel_id,
            error: "encoder process no longer exists".into(),
        });
        if channel.auto_restart {
            self.schedule_auto_restart(channel_id);
        }
    }

    /// Demote channels stuck in RESTARTING past the configured timeout,
    /// and settle RESTARTING store records with no in-flight restart
    /// (leftovers from a previous run) on ERROR.
    pub fn demote_stale_restarts(&self) {
        let timeout = Duration::from_secs(self.timing.restarting_timeout_secs);
        let stale: Vec<Uuid> = self
            .restarting
            .lock()
            .iter()
            .filter(|(_, entered)| entered.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();

        for channel_id in stale {
            warn!(%channel_id, "restart did not advance within {:?}, demoting to error", timeout);
            self.restarting.lock().remove(&channel_id);
            self.demote_to_error(channel_id, "restart timed out");
        }

        // The in-memory flag is inserted before the store ever shows
        // RESTARTING, so a RESTARTING record without a flag is an orphan.
        match self.store.list_channels_with_status(ChannelStatus::Restarting) {
            Ok(channels) => {
                for channel in channels {
                    if self.restarting.lock().contains_key(&channel.id) {
                        continue;
                    }
                    warn!(channel_id = %channel.id, "restarting channel has no restart in flight, demoting to error");
                    self.demote_to_error(channel.id, "restart did not survive a supervisor restart");
                }
            }
            Err(e) => warn!("could not list restarting channels: {}", e),
        }
    }

    fn demote_to_error(&self, channel_id: Uuid, reason: &str) {
        if let Err(e) = self
            .store
            .set_status_and_pid(channel_id, ChannelStatus::Error, None)
        {
            warn!(%channel_id, "could not persist error status: {}", e);
        }
        self.bus.publish(ChannelEvent::Error {
            channel_id,
            error: reason.to_string(),
        });
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Terminate all encoder children and wait for them to exit. The
    /// persisted statuses are left untouched so the next run's
    /// reconciliation can resume the declared state.
    pub async fn shutdown(self: &Arc<Self>) {
        let channels = self.running_channels();
        if channels.is_empty() {
            return;
        }
        info!("stopping {} encoder process(es)", channels.len());
        let terminations: Vec<_> = channels
            .into_iter()
            .filter_map(|channel_id| {
                let pid = self.slots.read().get(&channel_id).map(|slot| slot.pid)?;
                self.expected_exits.lock().insert(channel_id);
                let sup = Arc::clone(self);
                Some(async move {
                    sup.signal_and_wait(channel_id, pid, true).await;
                    sup.slots.write().remove(&channel_id);
                    sup.parser.lock().clear(channel_id);
                    sup.expected_exits.lock().remove(&channel_id);
                })
            })
            .collect();
        futures::future::join_all(terminations).await;
    }

    // =========================================================================
    // Child observation tasks
    // =========================================================================

    async fn read_stdout(self: Arc<Self>, channel_id: Uuid, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            self.bus
                .publish(ChannelEvent::log(channel_id, LogLevel::Info, line));
        }
    }

    /// Stderr carries both progress records and diagnostics; progress
    /// updates the metrics slot, everything else becomes a log event.
    async fn read_stderr(self: Arc<Self>, channel_id: Uuid, mut stderr: ChildStderr) {
        let mut buf = [0u8; 4096];
        loop {
            let n = match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
            let (records, lines) = self.parser.lock().feed_split(channel_id, &chunk);

            if let Some(record) = records.into_iter().last() {
                if let Some(slot) = self.slots.write().get_mut(&channel_id) {
                    slot.metrics = Some(record);
                }
            }
            for line in lines {
                self.bus
                    .publish(ChannelEvent::log(channel_id, LogLevel::Info, line));
            }
        }
    }

    async fn wait_for_exit(self: Arc<Self>, channel_id: Uuid, mut child: Child) {
        let status = child.wait().await;

        self.slots.write().remove(&channel_id);
        self.parser.lock().clear(channel_id);
        if self.expected_exits.lock().remove(&channel_id) {
            // stop()/shutdown() owns the state transition
            return;
        }
        // A stop that gave up waiting may have already persisted STOPPED;
        // that transition wins over the late exit.
        if let Ok(channel) = self.store.get_channel(channel_id) {
            if channel.status == ChannelStatus::Stopped {
                return;
            }
        }

        let code = status.as_ref().ok().and_then(|s| s.code());
        match code {
            Some(0) => {
                info!(%channel_id, "encoder exited normally");
                if let Err(e) = self
                    .store
                    .set_status_and_pid(channel_id, ChannelStatus::Stopped, None)
                {
                    warn!(%channel_id, "could not persist stopped status: {}", e);
                }
                self.bus.publish(ChannelEvent::Stopped {
                    channel_id,
                    exit_code: Some(0),
                });
            }
            code => {
                warn!(%channel_id, ?code, "encoder exited abnormally");
                if let Err(e) = self
                    .store
                    .set_status_and_pid(channel_id, ChannelStatus::Error, None)
                {
                    warn!(%channel_id, "could not persist error status: {}", e);
                }
                self.bus.publish(ChannelEvent::Stopped {
                    channel_id,
                    exit_code: code,
                });
                self.bus.publish(ChannelEvent::Error {
                    channel_id,
                    error: match code {
                        Some(code) => format!("encoder exited with code {}", code),
                        None => "encoder was killed by a signal".into(),
                    },
                });

                match self.store.get_channel(channel_id) {
                    Ok(channel) if channel.auto_restart => {
                        self.schedule_auto_restart(channel_id);
                    }
                    _ => {}
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn channel_lock(&self, channel_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(channel_id).or_default().clone()
    }

    /// Delete the contents of the channel's media directory, keeping
    /// the directory itself.
    fn purge_channel_dir(&self, channel_id: Uuid) {
        let dir = self.channel_dir(channel_id);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                debug!(%channel_id, "could not remove {}: {}", path.display(), e);
            }
        }
    }
}

/// How a stop transition should be persisted.
#[derive(Clone, Copy)]
enum StopMode {
    /// Operator stop: status becomes STOPPED, restart bookkeeping clears
    Operator { clean_files: bool },
    /// Internal stop inside a restart: status stays RESTARTING
    ForRestart,
}

/// Removes the channel from the restarting set when the restart path
/// unwinds, success or failure.
struct RestartingFlag {
    supervisor: Arc<Supervisor>,
    channel_id: Uuid,
}

impl Drop for RestartingFlag {
    fn drop(&mut self) {
        self.supervisor.restarting.lock().remove(&self.channel_id);
    }
}
