//! # restreamd
//!
//! Media-stream supervisor: keeps a population of long-lived external
//! FFmpeg transcoding processes (one per declared channel) in their
//! declared target state despite crashes, transient input failures and
//! concurrent control requests.
//!
//! # Architecture
//!
//! ```text
//! restreamd
//!   ├─> CapabilityProbe (hardware encoder detection, memoised)
//!   ├─> CommandBuilder (channel + output → encoder argv)
//!   ├─> Supervisor (process lifecycle, state machine, restart budget)
//!   ├─> ProgressParser / ProcessMonitor (stderr metrics + OS stats)
//!   ├─> HealthMonitor (declared vs. actual reconciliation)
//!   ├─> StatsFanout (snapshot pushes to subscribers)
//!   └─> ChannelService (operator API facade)
//! ```
//!
//! # Data Flow
//!
//! **Control path:** operator → `ChannelService` → `Supervisor` →
//! `CommandBuilder` (consulting `CapabilityProbe`) → encoder child
//!
//! **Observation path:** encoder stderr → `ProgressParser` → slot
//! metrics → `StatsFanout` → subscribers; lifecycle events → `EventBus`
//! → log persister → store

#![warn(clippy::all)]

/// Operator service layer
pub mod api;

/// Channel data model (records, parameters, outputs)
pub mod channel;

/// Encoder argv synthesis
pub mod command;

/// Configuration management
pub mod config;

/// Unified error type
pub mod error;

/// Subscriber snapshot fanout
pub mod fanout;

/// Periodic reconciliation loop
pub mod health;

/// Hardware-acceleration probing
pub mod hwaccel;

/// Encoder progress parsing and OS process statistics
pub mod monitor;

/// Server composition root
pub mod server;

/// Persistent store for channels and logs
pub mod store;

/// Process lifecycle supervision
pub mod supervisor;

pub use error::{Error, ErrorKind, Result};
