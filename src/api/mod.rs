//! Operator service layer
//!
//! `ChannelService` is the async API the control surfaces (REST,
//! WebSocket) call into. It composes the store, the supervisor and the
//! fanout, and enforces the operator-facing rules that do not belong in
//! the supervisor itself: edit restrictions while running, delete
//! implying stop, log pagination, and the ffprobe-based stream
//! analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::{Channel, ChannelDraft, ChannelStatus, ChannelUpdate};
use crate::config::EncoderConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::fanout::{ChannelSnapshot, StatsFanout};
use crate::hwaccel::{CapabilityProbe, HwCapability};
use crate::store::{ChannelLog, LogQuery, Store};
use crate::supervisor::Supervisor;

/// Timeout for the ffprobe stream analysis call.
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Compact status answer for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub id: Uuid,
    pub name: String,
    pub status: ChannelStatus,
    pub pid: Option<u32>,
    /// Seconds since the supervisor spawned the encoder (None when not
    /// running under this supervisor)
    pub uptime_secs: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

/// One audio stream reported by the probe utility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub index: u32,
    pub codec: String,
    pub channels: u32,
    pub channel_layout: Option<String>,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
    pub title: Option<String>,
}

/// Async operator API over the core.
pub struct ChannelService {
    store: Arc<Store>,
    supervisor: Arc<Supervisor>,
    fanout: Arc<StatsFanout>,
    probe: Arc<CapabilityProbe>,
    encoder_config: EncoderConfig,
}

impl ChannelService {
    pub fn new(
        store: Arc<Store>,
        supervisor: Arc<Supervisor>,
        fanout: Arc<StatsFanout>,
        probe: Arc<CapabilityProbe>,
        encoder_config: EncoderConfig,
    ) -> Self {
        Self {
            store,
            supervisor,
            fanout,
            probe,
            encoder_config,
        }
    }

    // =========================================================================
    // Channel CRUD
    // =========================================================================

    pub fn list_channels(&self) -> Result<Vec<Channel>> {
        self.store.list_channels()
    }

    pub fn get_channel(&self, id: Uuid) -> Result<Channel> {
        self.store.get_channel(id)
    }

    pub fn create_channel(&self, draft: ChannelDraft) -> Result<Channel> {
        let channel = draft.into_channel();
        channel.validate()?;
        self.store.create_channel(&channel)?;
        info!(channel_id = %channel.id, name = %channel.name, "channel created");
        Ok(channel)
    }

    /// Apply a partial update. While the channel is RUNNING only `name`
    /// and `auto_restart` may change.
    pub fn update_channel(&self, id: Uuid, update: ChannelUpdate) -> Result<Channel> {
        let mut channel = self.store.get_channel(id)?;

        let running =
            channel.status == ChannelStatus::Running || self.supervisor.slot(id).is_some();
        if running {
            if let Some(field) = update.touches_critical_fields() {
                return Err(Error::EditWhileRunning {
                    id,
                    field: field.to_string(),
                });
            }
        }

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(Error::Validation("channel name must not be empty".into()));
            }
            channel.name = name;
        }
        if let Some(auto_restart) = update.auto_restart {
            channel.auto_restart = auto_restart;
        }
        if let Some(input_url) = update.input_url {
            channel.input_url = input_url;
        }
        if let Some(params) = update.ffmpeg_params {
            channel.ffmpeg_params = params;
        }
        if let Some(outputs) = update.outputs {
            channel.outputs = outputs;
        }
        channel.validate()?;

        self.store.update_channel(&channel)?;
        self.store.get_channel(id)
    }

    /// Delete a channel. A running encoder is stopped first and the
    /// channel's media directory is removed.
    pub async fn delete_channel(&self, id: Uuid) -> Result<()> {
        // Soft-stop: a channel that is already stopped is fine to delete
        match self.supervisor.stop(id, true).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Conflict => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(e),
            Err(e) => return Err(e),
        }
        self.store.delete_channel(id)?;
        let dir = self.supervisor.channel_dir(id);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            debug!(channel_id = %id, "could not remove media dir: {}", e);
        }
        info!(channel_id = %id, "channel deleted");
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn start(&self, id: Uuid) -> Result<u32> {
        self.supervisor.start(id).await
    }

    pub async fn stop(&self, id: Uuid, clean_files: bool) -> Result<()> {
        self.supervisor.stop(id, clean_files).await
    }

    pub async fn restart(&self, id: Uuid) -> Result<u32> {
        self.supervisor.restart(id).await
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn get_status(&self, id: Uuid) -> Result<StatusReport> {
        let channel = self.store.get_channel(id)?;
        let uptime_secs = self.supervisor.slot(id).map(|slot| slot.uptime_secs());
        Ok(StatusReport {
            id: channel.id,
            name: channel.name,
            status: channel.status,
            pid: channel.pid,
            uptime_secs,
            updated_at: channel.updated_at,
        })
    }

    /// Full snapshot: persisted record + OS stats + latest metrics.
    pub async fn get_stats(&self, id: Uuid) -> Result<ChannelSnapshot> {
        self.fanout.snapshot(id).await
    }

    pub fn get_logs(&self, id: Uuid, query: &LogQuery) -> Result<Vec<ChannelLog>> {
        // Surface NOT_FOUND for unknown channels instead of an empty page
        self.store.get_channel(id)?;
        self.store.get_logs(id, query)
    }

    pub fn delete_logs(&self, id: Uuid) -> Result<u64> {
        self.store.get_channel(id)?;
        self.store.delete_logs(id)
    }

    /// Probed hardware capabilities (cached).
    pub async fn hardware_capabilities(&self) -> Vec<HwCapability> {
        self.probe.capabilities().await
    }

    /// Drop the capability cache so the next query re-probes.
    pub fn refresh_hardware_capabilities(&self) {
        self.probe.invalidate();
    }

    // =========================================================================
    // Stream analysis
    // =========================================================================

    /// Run the encoder's probe utility against an input and report its
    /// audio streams.
    pub async fn analyze_audio_tracks(&self, input_url: &str) -> Result<Vec<AudioTrack>> {
        if input_url.trim().is_empty() {
            return Err(Error::Validation("input_url must not be empty".into()));
        }

        let output = tokio::time::timeout(
            ANALYZE_TIMEOUT,
            Command::new(&self.encoder_config.ffprobe_path)
                .args([
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_streams",
                    "-select_streams",
                    "a",
                ])
                .arg(input_url)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| Error::Internal("ffprobe timed out".into()))?
        .map_err(Error::Io)?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "ffprobe exited with {:?}",
                output.status.code()
            )));
        }

        parse_audio_streams(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse ffprobe's `-show_streams` JSON into audio track descriptors.
fn parse_audio_streams(json: &str) -> Result<Vec<AudioTrack>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::Internal(format!("unparseable ffprobe output: {}", e)))?;

    let streams = value
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut tracks = Vec::with_capacity(streams.len());
    for stream in streams {
        let tags = stream.get("tags");
        tracks.push(AudioTrack {
            index: stream
                .get("index")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            codec: stream
                .get("codec_name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            channels: stream
                .get("channels")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            channel_layout: stream
                .get("channel_layout")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            sample_rate: stream
                .get("sample_rate")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok()),
            language: tags
                .and_then(|t| t.get("language"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            title: tags
                .and_then(|t| t.get("title"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
        });
    }
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{EncoderParams, Output};
    use crate::config::Config;
    use crate::monitor::ProcessMonitor;
    use crate::supervisor::EventBus;
    use std::path::PathBuf;

    fn service() -> ChannelService {
        let config = Config::default();
        let store = Arc::new(Store::open_in_memory(100).unwrap());
        let probe = Arc::new(CapabilityProbe::new(config.encoder.clone()));
        probe.prime(vec![]);
        let supervisor = Supervisor::new(
            config.supervisor.clone(),
            config.encoder.clone(),
            PathBuf::from("/tmp/restreamd-test-media"),
            Arc::clone(&store),
            Arc::clone(&probe),
            EventBus::new(16),
        );
        let fanout = StatsFanout::new(
            Arc::clone(&store),
            Arc::clone(&supervisor),
            Arc::new(ProcessMonitor::new()),
            &config.fanout,
        );
        ChannelService::new(store, supervisor, fanout, probe, config.encoder)
    }

    fn draft() -> ChannelDraft {
        ChannelDraft {
            name: "kids".into(),
            input_url: "udp://239.0.0.5:1234".into(),
            auto_restart: false,
            ffmpeg_params: EncoderParams::default(),
            outputs: vec![Output::Hls {}],
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = service();
        let channel = service.create_channel(draft()).unwrap();
        let loaded = service.get_channel(channel.id).unwrap();
        assert_eq!(loaded.name, "kids");
        assert_eq!(loaded.status, ChannelStatus::Stopped);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_draft() {
        let service = service();
        let mut bad = draft();
        bad.outputs.clear();
        let err = service.create_channel(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_update_restrictions_while_running() {
        let service = service();
        let channel = service.create_channel(draft()).unwrap();
        // Simulate a running channel at the store level
        service
            .store
            .set_status_and_pid(channel.id, ChannelStatus::Running, Some(123))
            .unwrap();

        // Renaming is allowed
        let updated = service
            .update_channel(
                channel.id,
                ChannelUpdate {
                    name: Some("kids-hd".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "kids-hd");

        // Critical fields are frozen
        let err = service
            .update_channel(
                channel.id,
                ChannelUpdate {
                    input_url: Some("udp://other".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_delete_unknown_channel() {
        let service = service();
        let err = service.delete_channel(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_stopped_channel_succeeds() {
        let service = service();
        let channel = service.create_channel(draft()).unwrap();
        service.delete_channel(channel.id).await.unwrap();
        let err = service.get_channel(channel.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_get_status_reports_store_state() {
        let service = service();
        let channel = service.create_channel(draft()).unwrap();
        let report = service.get_status(channel.id).unwrap();
        assert_eq!(report.status, ChannelStatus::Stopped);
        assert!(report.pid.is_none());
        assert!(report.uptime_secs.is_none());
    }

    #[tokio::test]
    async fn test_logs_for_unknown_channel() {
        let service = service();
        let err = service
            .get_logs(Uuid::new_v4(), &LogQuery::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_parse_audio_streams() {
        let json = r#"{
            "streams": [
                {
                    "index": 1,
                    "codec_name": "aac",
                    "channels": 2,
                    "channel_layout": "stereo",
                    "sample_rate": "48000",
                    "tags": {"language": "eng", "title": "English Stereo"}
                },
                {
                    "index": 2,
                    "codec_name": "ac3",
                    "channels": 6,
                    "channel_layout": "5.1(side)",
                    "sample_rate": "48000",
                    "tags": {"language": "ger"}
                }
            ]
        }"#;
        let tracks = parse_audio_streams(json).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].codec, "aac");
        assert_eq!(tracks[0].sample_rate, Some(48_000));
        assert_eq!(tracks[0].title.as_deref(), Some("English Stereo"));
        assert_eq!(tracks[1].channels, 6);
        assert_eq!(tracks[1].language.as_deref(), Some("ger"));
        assert!(tracks[1].title.is_none());
    }

    #[test]
    fn test_parse_audio_streams_empty() {
        assert!(parse_audio_streams("{}").unwrap().is_empty());
        assert!(parse_audio_streams("not json").is_err());
    }
}
