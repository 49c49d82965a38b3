//! Unified error type for supervisor operations
//!
//! Callers of the channel service and supervisor need to distinguish a
//! handful of failure classes (bad input, unknown channel, state conflict,
//! missing device, spawn failure, everything else). This module provides a
//! single enum covering those classes so the operator surface can map them
//! onto response codes without string matching.

use thiserror::Error;
use uuid::Uuid;

/// Coarse failure class, stable across error message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Channel record is missing required fields or has an invalid status
    Validation,
    /// Channel id is unknown
    NotFound,
    /// Operation conflicts with the channel's current state
    Conflict,
    /// A required OS resource (render device, directory) is missing
    Resource,
    /// The encoder child process could not be created
    Spawn,
    /// Unexpected store or I/O failure
    Internal,
}

/// Error type for all supervisor and channel-service operations
#[derive(Debug, Error)]
pub enum Error {
    // =========================================================================
    // Caller errors
    // =========================================================================
    /// Channel configuration failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// No channel with the given id exists
    #[error("channel {0} not found")]
    ChannelNotFound(Uuid),

    /// The channel is already running
    #[error("channel {0} is already running")]
    AlreadyRunning(Uuid),

    /// The channel has no running process to stop
    #[error("channel {0} is not running")]
    NotRunning(Uuid),

    /// A restart for this channel is already in flight
    #[error("channel {0} is already restarting")]
    AlreadyRestarting(Uuid),

    /// Critical fields cannot be edited while the channel runs
    #[error("channel {id} is running; field '{field}' cannot be changed until it is stopped")]
    EditWhileRunning { id: Uuid, field: String },

    /// The rolling restart window is exhausted
    #[error("channel {id} exceeded the restart budget ({attempts} attempts in {window_secs}s)")]
    RestartBudgetExceeded {
        id: Uuid,
        attempts: u32,
        window_secs: u64,
    },

    // =========================================================================
    // Environment errors
    // =========================================================================
    /// A hardware device needed by the command is missing or unreadable
    #[error("device not accessible: {path} ({reason}); expose the DRI render node to the runtime sandbox")]
    DeviceNotAccessible { path: String, reason: String },

    /// Spawning the encoder child failed at the OS level
    #[error("failed to spawn encoder: {0}")]
    Spawn(#[source] std::io::Error),

    // =========================================================================
    // Internal errors
    // =========================================================================
    /// Store (SQLite) failure
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Filesystem or pipe failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else that should not happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map onto the coarse failure class callers dispatch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::ChannelNotFound(_) => ErrorKind::NotFound,
            Error::AlreadyRunning(_)
            | Error::NotRunning(_)
            | Error::AlreadyRestarting(_)
            | Error::EditWhileRunning { .. }
            | Error::RestartBudgetExceeded { .. } => ErrorKind::Conflict,
            Error::DeviceNotAccessible { .. } => ErrorKind::Resource,
            Error::Spawn(_) => ErrorKind::Spawn,
            Error::Store(_) | Error::Io(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
