//! Channel data model
//!
//! A channel is a declared, persistently configured long-running stream
//! job: one input locator, an encoder-parameter bag, and at least one
//! output destination. The supervisor drives the channel's OS process
//! toward the declared status; the store keeps the record durable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub mod output;
pub mod params;

pub use output::Output;
pub use params::{EncoderParams, OptionBag};

/// Declared target state of a channel.
///
/// Invariant: `Running` implies a non-null pid owned by this supervisor;
/// `Stopped` and `Error` imply a null pid. The health loop reconciles
/// violations within one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Stopped,
    Running,
    Error,
    Restarting,
}

impl ChannelStatus {
    /// Stable textual form used in the store and over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Stopped => "stopped",
            ChannelStatus::Running => "running",
            ChannelStatus::Error => "error",
            ChannelStatus::Restarting => "restarting",
        }
    }

    /// Parse the stored textual form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(ChannelStatus::Stopped),
            "running" => Some(ChannelStatus::Running),
            "error" => Some(ChannelStatus::Error),
            "restarting" => Some(ChannelStatus::Restarting),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The declared stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Opaque identifier
    pub id: Uuid,
    /// Human name
    pub name: String,
    /// Input locator (URL or device path)
    pub input_url: String,
    /// Declared target status
    pub status: ChannelStatus,
    /// Restart automatically after a non-zero encoder exit
    pub auto_restart: bool,
    /// Last known OS process id of the encoder
    pub pid: Option<u32>,
    /// Encoder parameter bag
    pub ffmpeg_params: EncoderParams,
    /// Ordered output list; the first entry drives the spawned encoder
    pub outputs: Vec<Output>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Validate the fields a start operation depends on.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("channel name must not be empty".into()));
        }
        if self.input_url.trim().is_empty() {
            return Err(Error::Validation("channel input_url must not be empty".into()));
        }
        if self.outputs.is_empty() {
            return Err(Error::Validation(
                "channel must declare at least one output".into(),
            ));
        }
        Ok(())
    }

    /// The output the spawned encoder is built from.
    pub fn primary_output(&self) -> Result<&Output> {
        self.outputs
            .first()
            .ok_or_else(|| Error::Validation("channel must declare at least one output".into()))
    }
}

/// Fields supplied when creating a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDraft {
    pub name: String,
    pub input_url: String,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub ffmpeg_params: EncoderParams,
    pub outputs: Vec<Output>,
}

impl ChannelDraft {
    /// Materialize into a stopped channel record.
    pub fn into_channel(self) -> Channel {
        let now = Utc::now();
        Channel {
            id: Uuid::new_v4(),
            name: self.name,
            input_url: self.input_url,
            status: ChannelStatus::Stopped,
            auto_restart: self.auto_restart,
            pid: None,
            ffmpeg_params: self.ffmpeg_params,
            outputs: self.outputs,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by the edit operation. `None` leaves the field
/// untouched. While a channel is RUNNING only `name` and `auto_restart`
/// may change; the service layer enforces that rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input_url: Option<String>,
    #[serde(default)]
    pub auto_restart: Option<bool>,
    #[serde(default)]
    pub ffmpeg_params: Option<EncoderParams>,
    #[serde(default)]
    pub outputs: Option<Vec<Output>>,
}

impl ChannelUpdate {
    /// True when the update touches fields that are frozen while running.
    pub fn touches_critical_fields(&self) -> Option<&'static str> {
        if self.input_url.is_some() {
            Some("input_url")
        } else if self.ffmpeg_params.is_some() {
            Some("ffmpeg_params")
        } else if self.outputs.is_some() {
            Some("outputs")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ChannelDraft {
        ChannelDraft {
            name: "news".into(),
            input_url: "https://example.com/live.m3u8".into(),
            auto_restart: true,
            ffmpeg_params: EncoderParams::default(),
            outputs: vec![Output::Udp {
                host: "10.0.0.1".into(),
                port: 5000,
                pkt_size: None,
                buffer_size: None,
                hls_program_index: None,
                map_video: None,
                map_audio: None,
                realtime: None,
            }],
        }
    }

    #[test]
    fn test_draft_creates_stopped_channel() {
        let channel = draft().into_channel();
        assert_eq!(channel.status, ChannelStatus::Stopped);
        assert!(channel.pid.is_none());
        assert!(channel.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        let mut channel = draft().into_channel();
        channel.name = "  ".into();
        assert!(channel.validate().is_err());

        let mut channel = draft().into_channel();
        channel.outputs.clear();
        assert!(channel.validate().is_err());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            ChannelStatus::Stopped,
            ChannelStatus::Running,
            ChannelStatus::Error,
            ChannelStatus::Restarting,
        ] {
            assert_eq!(ChannelStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChannelStatus::parse("paused"), None);
    }

    #[test]
    fn test_update_critical_field_detection() {
        let update = ChannelUpdate {
            name: Some("renamed".into()),
            ..Default::default()
        };
        assert!(update.touches_critical_fields().is_none());

        let update = ChannelUpdate {
            input_url: Some("udp://in".into()),
            ..Default::default()
        };
        assert_eq!(update.touches_critical_fields(), Some("input_url"));
    }
}
