//! Observation pipeline
//!
//! Two complementary views of a running encoder:
//!
//! - [`progress`]: the encoder's own stderr status stream, parsed into
//!   structured [`progress::MetricRecord`]s as it arrives
//! - [`process`]: OS-level truth about the child process (liveness,
//!   CPU, memory, network counters, socket count)
//!
//! Both are lossy by design: a malformed status line or an unreadable
//! procfs entry degrades to missing data, never to a supervisor error.

pub mod process;
pub mod progress;

pub use process::{cmdline_matches, pid_alive, ProcessMonitor, ProcessStats};
pub use progress::{BitrateSource, MetricRecord, ProgressParser};
