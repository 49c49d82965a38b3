//! In-memory record of a running encoder

use chrono::{DateTime, Utc};

use crate::command::BuiltCommand;
use crate::monitor::MetricRecord;

/// Live-process bookkeeping for one channel. Exclusively owned by the
/// supervisor's slot table; never persisted.
#[derive(Debug, Clone)]
pub struct ProcessSlot {
    /// OS pid of the encoder child
    pub pid: u32,
    /// Spawn time
    pub started_at: DateTime<Utc>,
    /// The exact invocation used, for diagnostics
    pub command: BuiltCommand,
    /// Most recent parsed metric record
    pub metrics: Option<MetricRecord>,
}

impl ProcessSlot {
    pub fn new(pid: u32, command: BuiltCommand) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            command,
            metrics: None,
        }
    }

    /// Seconds since spawn.
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
