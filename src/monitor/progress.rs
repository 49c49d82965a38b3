//! Encoder progress parsing
//!
//! FFmpeg reports progress on stderr as repeated single-line status
//! records:
//!
//! ```text
//! frame=  123 fps= 25 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.0x
//! ```
//!
//! The stream arrives in arbitrary fragments (pipes do not respect line
//! boundaries) and lines may be terminated by `\r` as well as `\n`, so
//! the parser keeps a residual buffer per channel and only parses
//! complete lines. Lines without `frame=` are not progress and are
//! skipped; malformed fields degrade to their defaults rather than
//! failing the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Where a reported bitrate figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitrateSource {
    /// Extracted (or derived from size/time) from the encoder's own output
    Parsed,
    /// Computed from OS network counters
    CalculatedFromNetwork,
    /// Substituted from the channel's configured bitrate
    Configured,
}

/// One parsed encoder status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Frames emitted so far
    pub frame: u64,
    /// Instantaneous frames per second
    pub fps: f64,
    /// Encoder quality figure (`q=`)
    pub quality: f64,
    /// Accumulated output size in bytes
    pub size_bytes: u64,
    /// Stream time offset in seconds
    pub time_seconds: f64,
    /// Instantaneous bitrate in kbit/s
    pub bitrate_kbps: f64,
    /// Provenance of `bitrate_kbps`
    pub bitrate_source: BitrateSource,
    /// Mux speed relative to realtime (`speed=1.0x`)
    pub speed: f64,
    /// Per-stream byte totals when the line carries them
    pub video_bytes: Option<u64>,
    pub audio_bytes: Option<u64>,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

/// Streaming parser with per-channel residual-line buffers.
///
/// Each channel's stderr reader is the sole caller for its id, so the
/// buffers see single-writer single-reader traffic.
#[derive(Debug, Default)]
pub struct ProgressParser {
    buffers: HashMap<Uuid, String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a stderr fragment for one channel. Returns the records
    /// completed by this fragment, oldest first.
    pub fn feed(&mut self, channel_id: Uuid, chunk: &str) -> Vec<MetricRecord> {
        let buffer = self.buffers.entry(channel_id).or_default();
        buffer.push_str(chunk);

        let mut records = Vec::new();
        // Progress updates are \r-terminated while regular log lines use
        // \n; both delimit a complete line.
        while let Some(pos) = buffer.find(['\n', '\r']) {
            let line: String = buffer.drain(..=pos).collect();
            if let Some(record) = parse_progress_line(line.trim_end_matches(['\n', '\r'])) {
                records.push(record);
            }
        }
        records
    }

    /// Like [`Self::feed`], additionally returning the complete
    /// non-progress lines for log routing.
    pub fn feed_split(
        &mut self,
        channel_id: Uuid,
        chunk: &str,
    ) -> (Vec<MetricRecord>, Vec<String>) {
        let buffer = self.buffers.entry(channel_id).or_default();
        buffer.push_str(chunk);

        let mut records = Vec::new();
        let mut passthrough = Vec::new();
        while let Some(pos) = buffer.find(['\n', '\r']) {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            match parse_progress_line(line) {
                Some(record) => records.push(record),
                None if !line.trim().is_empty() => passthrough.push(line.to_string()),
                None => {}
            }
        }
        (records, passthrough)
    }

    /// Drop a channel's residual buffer on teardown.
    pub fn clear(&mut self, channel_id: Uuid) {
        self.buffers.remove(&channel_id);
    }
}

/// Parse one complete stderr line; `None` for anything that is not a
/// progress record.
pub fn parse_progress_line(line: &str) -> Option<MetricRecord> {
    if !line.contains("frame=") {
        return None;
    }

    // `frame=  123` and `frame=123` both occur; splitting on the
    // re-spaced `=` pairs keys with their values positionally.
    let spaced = line.replace('=', "= ");
    let tokens: Vec<&str> = spaced.split_whitespace().collect();

    let mut frame = 0u64;
    let mut fps = 0f64;
    let mut quality = 0f64;
    let mut size_bytes = 0u64;
    let mut time_seconds = 0f64;
    let mut bitrate_kbps: Option<f64> = None;
    let mut speed = 0f64;
    let mut video_bytes = None;
    let mut audio_bytes = None;

    for (i, token) in tokens.iter().enumerate() {
        let value = tokens.get(i + 1).copied().unwrap_or("");
        match *token {
            "frame=" => frame = value.parse().unwrap_or(0),
            "fps=" => fps = value.parse().unwrap_or(0.0),
            "q=" => quality = value.parse().unwrap_or(0.0),
            "size=" | "Lsize=" => size_bytes = parse_size_bytes(value).unwrap_or(0),
            "time=" => time_seconds = parse_timecode(value).unwrap_or(0.0),
            "bitrate=" => bitrate_kbps = parse_bitrate_kbps(value),
            "speed=" => speed = value.trim_end_matches('x').parse().unwrap_or(0.0),
            _ => {
                if let Some(rest) = token.strip_prefix("video:") {
                    video_bytes = parse_size_bytes(rest);
                } else if let Some(rest) = token.strip_prefix("audio:") {
                    audio_bytes = parse_size_bytes(rest);
                }
            }
        }
    }

    if frame == 0 && time_seconds == 0.0 && size_bytes == 0 {
        return None;
    }

    let bitrate_kbps = bitrate_kbps.unwrap_or_else(|| {
        if size_bytes > 0 && time_seconds > 0.0 {
            (size_bytes as f64 * 8.0) / (time_seconds * 1000.0)
        } else {
            0.0
        }
    });

    Some(MetricRecord {
        frame,
        fps,
        quality,
        size_bytes,
        time_seconds,
        bitrate_kbps,
        bitrate_source: BitrateSource::Parsed,
        speed,
        video_bytes,
        audio_bytes,
        captured_at: Utc::now(),
    })
}

/// `1024kB` / `12MB` / `3GB` / `512B` → bytes. Binary units, as FFmpeg
/// reports them.
fn parse_size_bytes(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || value == "N/A" {
        return None;
    }
    let (number, factor) = if let Some(n) = value.strip_suffix("kB") {
        (n, 1024u64)
    } else if let Some(n) = value.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = value.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = value.strip_suffix('k') {
        (n, 1024)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix('B') {
        (n, 1)
    } else {
        (value, 1)
    };
    let parsed: f64 = number.trim().parse().ok()?;
    Some((parsed * factor as f64) as u64)
}

/// `hh:mm:ss.cc` → seconds.
fn parse_timecode(value: &str) -> Option<f64> {
    let value = value.trim();
    if value == "N/A" {
        return None;
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `1677.7kbits/s` / `1.6mbits/s` / `800bits/s`, plus the abbreviated
/// `kbps` / `mbps` forms → kbit/s.
fn parse_bitrate_kbps(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() || value == "N/A" {
        return None;
    }
    let (number, factor) = if let Some(n) = value.strip_suffix("kbits/s") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix("mbits/s") {
        (n, 1000.0)
    } else if let Some(n) = value.strip_suffix("bits/s") {
        (n, 0.001)
    } else if let Some(n) = value.strip_suffix("kbps") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix("mbps") {
        (n, 1000.0)
    } else {
        (value, 1.0)
    };
    number.trim().parse::<f64>().ok().map(|v| v * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "frame=  123 fps= 25 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.0x";

    #[test]
    fn test_parse_reference_line() {
        let record = parse_progress_line(SAMPLE).expect("progress line must parse");
        assert_eq!(record.frame, 123);
        assert!((record.fps - 25.0).abs() < f64::EPSILON);
        assert!((record.quality - 28.0).abs() < f64::EPSILON);
        assert_eq!(record.size_bytes, 1_048_576);
        assert!((record.time_seconds - 5.0).abs() < 0.001);
        assert!((record.bitrate_kbps - 1677.7).abs() < 0.001);
        assert_eq!(record.bitrate_source, BitrateSource::Parsed);
        assert!((record.speed - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_progress_lines_yield_nothing() {
        assert!(parse_progress_line("Press [q] to stop, [?] for help").is_none());
        assert!(parse_progress_line("Input #0, mpegts, from 'udp://...':").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn test_bitrate_derived_from_size_and_time() {
        let line = "frame=  250 fps= 25 q=28.0 size=    1024kB time=00:00:10.00 bitrate=N/A speed=1.0x";
        let record = parse_progress_line(line).unwrap();
        // 1_048_576 * 8 / (10 * 1000)
        assert!((record.bitrate_kbps - 838.8608).abs() < 0.001);
    }

    #[test]
    fn test_bitrate_unit_variants() {
        assert_eq!(parse_bitrate_kbps("1677.7kbits/s"), Some(1677.7));
        assert_eq!(parse_bitrate_kbps("1.5mbits/s"), Some(1500.0));
        assert_eq!(parse_bitrate_kbps("800bits/s"), Some(0.8));
        assert_eq!(parse_bitrate_kbps("1200kbps"), Some(1200.0));
        assert_eq!(parse_bitrate_kbps("2mbps"), Some(2000.0));
        assert_eq!(parse_bitrate_kbps("N/A"), None);
    }

    #[test]
    fn test_size_unit_variants() {
        assert_eq!(parse_size_bytes("512B"), Some(512));
        assert_eq!(parse_size_bytes("1024kB"), Some(1_048_576));
        assert_eq!(parse_size_bytes("2MB"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size_bytes("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size_bytes("N/A"), None);
    }

    #[test]
    fn test_timecode_parsing() {
        assert_eq!(parse_timecode("00:00:05.00"), Some(5.0));
        assert_eq!(parse_timecode("01:02:03.50"), Some(3723.5));
        assert_eq!(parse_timecode("N/A"), None);
        assert_eq!(parse_timecode("garbage"), None);
    }

    #[test]
    fn test_stream_totals() {
        let line =
            "frame= 1000 fps= 30 q=-1.0 Lsize=    5120kB time=00:00:40.00 bitrate=1048.6kbits/s speed=1.2x video:4096k audio:512k";
        let record = parse_progress_line(line).unwrap();
        assert_eq!(record.video_bytes, Some(4096 * 1024));
        assert_eq!(record.audio_bytes, Some(512 * 1024));
    }

    #[test]
    fn test_fragmented_feed_reassembles_lines() {
        let mut parser = ProgressParser::new();
        let channel = Uuid::new_v4();

        let records = parser.feed(channel, "frame=  123 fps= 25 q=28.0 size=    1024kB ");
        assert!(records.is_empty(), "no complete line yet");

        let records = parser.feed(
            channel,
            "time=00:00:05.00 bitrate=1677.7kbits/s speed=1.0x\rframe=  124 ",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 123);

        let records = parser.feed(
            channel,
            "fps= 25 q=28.0 size=    1060kB time=00:00:05.04 bitrate=1677.9kbits/s speed=1.0x\r",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 124);
    }

    #[test]
    fn test_buffers_are_per_channel() {
        let mut parser = ProgressParser::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        parser.feed(a, "frame=  1 fps= 25 q=28.0 size=10kB ");
        let records = parser.feed(b, "frame=  9 fps= 30 q=20.0 size=90kB time=00:00:03.00 bitrate=245.8kbits/s speed=1x\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 9);

        // channel a's fragment is still pending
        let records = parser.feed(a, "time=00:00:01.00 bitrate=81.9kbits/s speed=1x\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 1);
    }

    #[test]
    fn test_feed_split_routes_non_progress_lines() {
        let mut parser = ProgressParser::new();
        let channel = Uuid::new_v4();

        let (records, logs) = parser.feed_split(
            channel,
            "Stream mapping:\n  Stream #0:0 -> #0:0 (copy)\nframe=  5 fps= 25 q=-1.0 size=64kB time=00:00:00.20 bitrate=2621.4kbits/s speed=1x\r",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0], "Stream mapping:");
    }

    #[test]
    fn test_clear_drops_residual() {
        let mut parser = ProgressParser::new();
        let channel = Uuid::new_v4();
        parser.feed(channel, "frame=  123 fps= 25");
        parser.clear(channel);
        let records = parser.feed(channel, " q=28.0 size=1024kB time=00:00:05.00 bitrate=1.0kbits/s speed=1x\n");
        // The stale fragment is gone, so this tail is not a progress line
        assert!(records.is_empty());
    }
}
