//! Persistent store for channels and channel logs
//!
//! Wraps a SQLite database holding the two core entities: `channels`
//! (the declared stream records) and `channel_logs` (append-only,
//! per-channel bounded). The connection lives behind a
//! `parking_lot::Mutex` since `rusqlite::Connection` is not `Sync`;
//! parking_lot avoids mutex poisoning on panic, which would otherwise
//! make every later query fail.
//!
//! Status and pid are always mutated together (`set_status_and_pid`) so
//! an external reader never observes `status=running` with a null pid.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

use crate::channel::{Channel, ChannelStatus, EncoderParams, Output};
use crate::error::{Error, Result};

/// One persisted log line for a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLog {
    pub id: i64,
    pub channel_id: Uuid,
    pub level: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Page request for log reads.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Maximum rows to return (None = 100)
    pub limit: Option<u32>,
    /// Rows to skip from the newest end
    pub offset: Option<u32>,
    /// Restrict to one level ("info", "warning", "error", ...)
    pub level: Option<String>,
}

/// SQLite-backed store for channels and channel logs.
pub struct Store {
    conn: Mutex<Connection>,
    max_logs_per_channel: u32,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path, max_logs_per_channel: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            max_logs_per_channel,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an ephemeral in-memory database (tests, dry runs).
    pub fn open_in_memory(max_logs_per_channel: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            max_logs_per_channel,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'stopped',
                input_url TEXT NOT NULL,
                ffmpeg_params TEXT NOT NULL DEFAULT '{}',
                outputs TEXT NOT NULL DEFAULT '[]',
                auto_restart INTEGER NOT NULL DEFAULT 0,
                pid INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_channels_status ON channels(status);
            CREATE INDEX IF NOT EXISTS idx_channels_pid ON channels(pid);
            CREATE INDEX IF NOT EXISTS idx_channels_created_at ON channels(created_at);
            CREATE INDEX IF NOT EXISTS idx_channel_logs_channel_id ON channel_logs(channel_id);
            CREATE INDEX IF NOT EXISTS idx_channel_logs_created_at ON channel_logs(created_at);
            CREATE INDEX IF NOT EXISTS idx_channel_logs_level ON channel_logs(level);
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// Insert a new channel record.
    pub fn create_channel(&self, channel: &Channel) -> Result<()> {
        let params_json = serde_json::to_string(&channel.ffmpeg_params)
            .map_err(|e| Error::Internal(format!("serialize ffmpeg_params: {}", e)))?;
        let outputs_json = serde_json::to_string(&channel.outputs)
            .map_err(|e| Error::Internal(format!("serialize outputs: {}", e)))?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO channels (
                id, name, status, input_url, ffmpeg_params, outputs,
                auto_restart, pid, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                channel.id.to_string(),
                channel.name,
                channel.status.as_str(),
                channel.input_url,
                params_json,
                outputs_json,
                channel.auto_restart,
                channel.pid,
                channel.created_at.to_rfc3339(),
                channel.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch one channel by id.
    pub fn get_channel(&self, id: Uuid) -> Result<Channel> {
        let conn = self.conn.lock();
        let channel = conn
            .query_row(
                r#"
                SELECT id, name, status, input_url, ffmpeg_params, outputs,
                       auto_restart, pid, created_at, updated_at
                FROM channels WHERE id = ?1
                "#,
                params![id.to_string()],
                Self::map_channel_row,
            )
            .optional()?;
        channel.ok_or(Error::ChannelNotFound(id))
    }

    /// All channels, newest first.
    pub fn list_channels(&self) -> Result<Vec<Channel>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, status, input_url, ffmpeg_params, outputs,
                   auto_restart, pid, created_at, updated_at
            FROM channels ORDER BY created_at DESC
            "#,
        )?;
        let rows = stmt.query_map([], Self::map_channel_row)?;
        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    /// Channels whose persisted status matches `status`.
    pub fn list_channels_with_status(&self, status: ChannelStatus) -> Result<Vec<Channel>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, status, input_url, ffmpeg_params, outputs,
                   auto_restart, pid, created_at, updated_at
            FROM channels WHERE status = ?1 ORDER BY created_at DESC
            "#,
        )?;
        let rows = stmt.query_map(params![status.as_str()], Self::map_channel_row)?;
        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    /// Update the mutable configuration fields of a channel.
    pub fn update_channel(&self, channel: &Channel) -> Result<()> {
        let params_json = serde_json::to_string(&channel.ffmpeg_params)
            .map_err(|e| Error::Internal(format!("serialize ffmpeg_params: {}", e)))?;
        let outputs_json = serde_json::to_string(&channel.outputs)
            .map_err(|e| Error::Internal(format!("serialize outputs: {}", e)))?;

        let conn = self.conn.lock();
        let updated = conn.execute(
            r#"
            UPDATE channels SET
                name = ?2, input_url = ?3, ffmpeg_params = ?4, outputs = ?5,
                auto_restart = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                channel.id.to_string(),
                channel.name,
                channel.input_url,
                params_json,
                outputs_json,
                channel.auto_restart,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::ChannelNotFound(channel.id));
        }
        Ok(())
    }

    /// Delete a channel; logs cascade.
    pub fn delete_channel(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM channels WHERE id = ?1", params![id.to_string()])?;
        if deleted == 0 {
            return Err(Error::ChannelNotFound(id));
        }
        Ok(())
    }

    /// Transition status and pid in one statement so no reader can observe
    /// a running channel without a pid.
    pub fn set_status_and_pid(
        &self,
        id: Uuid,
        status: ChannelStatus,
        pid: Option<u32>,
    ) -> Result<()> {
        debug_assert!(
            status != ChannelStatus::Running || pid.is_some(),
            "running status requires a pid"
        );
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE channels SET status = ?2, pid = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                pid,
                Utc::now().to_rfc3339()
            ],
        )?;
        if updated == 0 {
            return Err(Error::ChannelNotFound(id));
        }
        Ok(())
    }

    fn map_channel_row(row: &rusqlite::Row) -> rusqlite::Result<Channel> {
        let id_str: String = row.get(0)?;
        let id = Uuid::parse_str(&id_str).unwrap_or_else(|_| {
            warn!("Malformed channel id in store: {}", id_str);
            Uuid::nil()
        });

        let status_str: String = row.get(2)?;
        let status = ChannelStatus::parse(&status_str).unwrap_or_else(|| {
            warn!("Unknown channel status '{}', treating as error", status_str);
            ChannelStatus::Error
        });

        let params_json: String = row.get(4)?;
        let ffmpeg_params = serde_json::from_str::<serde_json::Value>(&params_json)
            .ok()
            .and_then(|v| EncoderParams::from_json(v).ok())
            .unwrap_or_default();

        let outputs_json: String = row.get(5)?;
        let outputs: Vec<Output> = serde_json::from_str(&outputs_json).unwrap_or_default();

        let created_at = parse_timestamp(row.get::<_, String>(8)?);
        let updated_at = parse_timestamp(row.get::<_, String>(9)?);

        Ok(Channel {
            id,
            name: row.get(1)?,
            input_url: row.get(3)?,
            status,
            auto_restart: row.get(6)?,
            pid: row.get(7)?,
            ffmpeg_params,
            outputs,
            created_at,
            updated_at,
        })
    }

    // =========================================================================
    // Channel logs
    // =========================================================================

    /// Append a log line, pruning the oldest rows past the retention cap.
    pub fn insert_log(&self, channel_id: Uuid, level: &str, message: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO channel_logs (channel_id, level, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                channel_id.to_string(),
                level,
                message,
                Utc::now().to_rfc3339()
            ],
        )?;
        conn.execute(
            r#"
            DELETE FROM channel_logs
            WHERE channel_id = ?1 AND id NOT IN (
                SELECT id FROM channel_logs
                WHERE channel_id = ?1
                ORDER BY id DESC LIMIT ?2
            )
            "#,
            params![channel_id.to_string(), self.max_logs_per_channel],
        )?;
        Ok(())
    }

    /// Read a page of logs, newest first, optionally restricted to a level.
    pub fn get_logs(&self, channel_id: Uuid, query: &LogQuery) -> Result<Vec<ChannelLog>> {
        let limit = query.limit.unwrap_or(100);
        let offset = query.offset.unwrap_or(0);

        let conn = self.conn.lock();
        let mut logs = Vec::new();
        if let Some(ref level) = query.level {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, channel_id, level, message, created_at FROM channel_logs
                WHERE channel_id = ?1 AND level = ?2
                ORDER BY id DESC LIMIT ?3 OFFSET ?4
                "#,
            )?;
            let rows = stmt.query_map(
                params![channel_id.to_string(), level, limit, offset],
                Self::map_log_row,
            )?;
            for row in rows {
                logs.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, channel_id, level, message, created_at FROM channel_logs
                WHERE channel_id = ?1
                ORDER BY id DESC LIMIT ?2 OFFSET ?3
                "#,
            )?;
            let rows = stmt.query_map(
                params![channel_id.to_string(), limit, offset],
                Self::map_log_row,
            )?;
            for row in rows {
                logs.push(row?);
            }
        }
        Ok(logs)
    }

    /// Drop all logs for a channel.
    pub fn delete_logs(&self, channel_id: Uuid) -> Result<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM channel_logs WHERE channel_id = ?1",
            params![channel_id.to_string()],
        )?;
        Ok(deleted as u64)
    }

    /// Number of retained log rows for a channel.
    pub fn count_logs(&self, channel_id: Uuid) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM channel_logs WHERE channel_id = ?1",
            params![channel_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn map_log_row(row: &rusqlite::Row) -> rusqlite::Result<ChannelLog> {
        let channel_id_str: String = row.get(1)?;
        Ok(ChannelLog {
            id: row.get(0)?,
            channel_id: Uuid::parse_str(&channel_id_str).unwrap_or(Uuid::nil()),
            level: row.get(2)?,
            message: row.get(3)?,
            created_at: parse_timestamp(row.get::<_, String>(4)?),
        })
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Failed to parse timestamp '{}': {}, using current time", raw, e);
            Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelDraft;

    fn store() -> Store {
        Store::open_in_memory(5).unwrap()
    }

    fn sample_channel() -> Channel {
        ChannelDraft {
            name: "sports".into(),
            input_url: "udp://239.0.0.1:1234".into(),
            auto_restart: true,
            ffmpeg_params: EncoderParams::default(),
            outputs: vec![Output::Udp {
                host: "10.0.0.2".into(),
                port: 6000,
                pkt_size: Some(1316),
                buffer_size: None,
                hls_program_index: None,
                map_video: None,
                map_audio: None,
                realtime: None,
            }],
        }
        .into_channel()
    }

    #[test]
    fn test_channel_roundtrip() {
        let store = store();
        let channel = sample_channel();
        store.create_channel(&channel).unwrap();

        let loaded = store.get_channel(channel.id).unwrap();
        assert_eq!(loaded.name, "sports");
        assert_eq!(loaded.status, ChannelStatus::Stopped);
        assert_eq!(loaded.outputs, channel.outputs);
        assert!(loaded.pid.is_none());
    }

    #[test]
    fn test_get_missing_channel_is_not_found() {
        let store = store();
        let err = store.get_channel(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_status_and_pid_move_together() {
        let store = store();
        let channel = sample_channel();
        store.create_channel(&channel).unwrap();

        store
            .set_status_and_pid(channel.id, ChannelStatus::Running, Some(4242))
            .unwrap();
        let loaded = store.get_channel(channel.id).unwrap();
        assert_eq!(loaded.status, ChannelStatus::Running);
        assert_eq!(loaded.pid, Some(4242));

        store
            .set_status_and_pid(channel.id, ChannelStatus::Stopped, None)
            .unwrap();
        let loaded = store.get_channel(channel.id).unwrap();
        assert_eq!(loaded.status, ChannelStatus::Stopped);
        assert!(loaded.pid.is_none());
    }

    #[test]
    fn test_list_by_status() {
        let store = store();
        let a = sample_channel();
        let b = sample_channel();
        store.create_channel(&a).unwrap();
        store.create_channel(&b).unwrap();
        store
            .set_status_and_pid(a.id, ChannelStatus::Running, Some(1))
            .unwrap();

        let running = store
            .list_channels_with_status(ChannelStatus::Running)
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a.id);
    }

    #[test]
    fn test_log_retention_cap() {
        let store = store();
        let channel = sample_channel();
        store.create_channel(&channel).unwrap();

        for i in 0..12 {
            store
                .insert_log(channel.id, "info", &format!("line {}", i))
                .unwrap();
        }
        assert_eq!(store.count_logs(channel.id).unwrap(), 5);

        // The newest rows survive
        let logs = store.get_logs(channel.id, &LogQuery::default()).unwrap();
        assert_eq!(logs[0].message, "line 11");
        assert_eq!(logs.last().unwrap().message, "line 7");
    }

    #[test]
    fn test_log_level_filter_and_pagination() {
        let store = store();
        let channel = sample_channel();
        store.create_channel(&channel).unwrap();

        store.insert_log(channel.id, "info", "started").unwrap();
        store.insert_log(channel.id, "error", "boom").unwrap();
        store.insert_log(channel.id, "info", "stopped").unwrap();

        let errors = store
            .get_logs(
                channel.id,
                &LogQuery {
                    level: Some("error".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "boom");

        let page = store
            .get_logs(
                channel.id,
                &LogQuery {
                    limit: Some(1),
                    offset: Some(1),
                    level: None,
                },
            )
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message, "boom");
    }

    #[test]
    fn test_delete_channel_cascades_logs() {
        let store = store();
        let channel = sample_channel();
        store.create_channel(&channel).unwrap();
        store.insert_log(channel.id, "info", "hello").unwrap();

        store.delete_channel(channel.id).unwrap();
        assert_eq!(store.count_logs(channel.id).unwrap(), 0);
    }
}
