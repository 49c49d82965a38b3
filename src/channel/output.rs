//! Output destination variants
//!
//! A channel declares an ordered list of outputs. The supervisor currently
//! spawns one encoder per channel, built from the first output; the list
//! form is kept so additional encoder processes per channel can be added
//! without a schema change.

use serde::{Deserialize, Serialize};

/// One destination of a channel, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Output {
    /// MPEG-TS over UDP
    Udp {
        host: String,
        port: u16,
        /// UDP payload size appended to the destination URL
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pkt_size: Option<u32>,
        /// Socket buffer size appended to the destination URL
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer_size: Option<u32>,
        /// Select input streams by program index instead of stream index
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hls_program_index: Option<u32>,
        /// Emit the default video map (`false` drops it)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_video: Option<bool>,
        /// Emit the default audio map (`false` drops it)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_audio: Option<bool>,
        /// Force or suppress `-re` pacing regardless of input kind
        #[serde(default, skip_serializing_if = "Option::is_none")]
        realtime: Option<bool>,
    },
    /// HLS playlist + segments in the channel's media directory
    Hls {},
    /// DVB tuner source (device/frequency/modulation come from the
    /// channel's encoder parameters)
    Dvb {},
    /// Plain file recording in the channel's media directory
    File {},
}

impl Output {
    /// Kind name used in logs and validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Output::Udp { .. } => "udp",
            Output::Hls {} => "hls",
            Output::Dvb {} => "dvb",
            Output::File {} => "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_output_roundtrip() {
        let json = r#"{"type":"udp","host":"10.0.0.1","port":5000,"pkt_size":1316}"#;
        let output: Output = serde_json::from_str(json).unwrap();
        match &output {
            Output::Udp {
                host,
                port,
                pkt_size,
                ..
            } => {
                assert_eq!(host, "10.0.0.1");
                assert_eq!(*port, 5000);
                assert_eq!(*pkt_size, Some(1316));
            }
            other => panic!("unexpected output kind: {}", other.kind()),
        }
    }

    #[test]
    fn test_bare_kinds_deserialize() {
        let hls: Output = serde_json::from_str(r#"{"type":"hls"}"#).unwrap();
        assert_eq!(hls.kind(), "hls");
        let dvb: Output = serde_json::from_str(r#"{"type":"dvb"}"#).unwrap();
        assert_eq!(dvb.kind(), "dvb");
        let file: Output = serde_json::from_str(r#"{"type":"file"}"#).unwrap();
        assert_eq!(file.kind(), "file");
    }
}
