//! Encoder parameter bag
//!
//! `EncoderParams` is the recognized-options record attached to every
//! channel and consumed during command synthesis. Only the keys listed
//! here have an effect; unknown keys survive a round-trip through the
//! store but are reported once at parse time and otherwise ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Free-form option bag accepted in three spellings:
/// a key→value mapping, a flat argument sequence, or one
/// whitespace-separated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionBag {
    /// `{"fflags": "+genpts", "probesize": 1000000}`
    Map(serde_json::Map<String, Value>),
    /// `["-fflags", "+genpts"]`
    List(Vec<String>),
    /// `"-fflags +genpts"`
    Line(String),
}

impl OptionBag {
    /// Expand into argv fragments. The mapping form expands each entry to
    /// `-key value`; a null or empty value emits the bare flag.
    pub fn expand(&self) -> Vec<String> {
        match self {
            OptionBag::Map(map) => {
                let mut args = Vec::with_capacity(map.len() * 2);
                for (key, value) in map {
                    let key = key.trim_start_matches('-');
                    args.push(format!("-{}", key));
                    match value {
                        Value::Null => {}
                        Value::String(s) if s.is_empty() => {}
                        Value::String(s) => args.push(s.clone()),
                        Value::Bool(b) => args.push(b.to_string()),
                        Value::Number(n) => args.push(n.to_string()),
                        other => args.push(other.to_string()),
                    }
                }
                args
            }
            OptionBag::List(items) => items.clone(),
            OptionBag::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }
}

fn de_stringish<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// Recognized encoder options applied during command synthesis.
///
/// String-valued fields accept JSON numbers too (`"crf": 23` and
/// `"crf": "23"` are equivalent); they are emitted verbatim as flag
/// values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderParams {
    /// Emitted before the input as `-fflags <value>`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub fflags: Option<String>,

    /// Arbitrary pre-input flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_options: Option<OptionBag>,

    /// Video codec selection; `copy` means passthrough
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    /// Audio codec selection; `copy` means passthrough
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,

    /// `-b:v`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,
    /// `-b:a`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
    /// `-s`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// `-r`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub framerate: Option<String>,

    /// `-vf` filter graph
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub video_filters: Option<String>,
    /// `-af` filter graph
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub audio_filters: Option<String>,

    /// Encoder preset; remapped to `p1`..`p7` for NVENC
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    /// `-tune`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub tune: Option<String>,
    /// `-profile:v`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// `-level`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// GOP size, `-g`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub g: Option<String>,
    /// `-keyint_min`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub keyint_min: Option<String>,
    /// `-sc_threshold`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub sc_threshold: Option<String>,
    /// `-vsync`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub vsync: Option<String>,
    /// Audio sync compensation, `-async`
    #[serde(
        default,
        rename = "async",
        deserialize_with = "de_stringish",
        skip_serializing_if = "Option::is_none"
    )]
    pub audio_sync: Option<String>,
    /// `-crf`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub crf: Option<String>,
    /// `-qp`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub qp: Option<String>,
    /// `-maxrate`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub maxrate: Option<String>,
    /// `-minrate`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub minrate: Option<String>,
    /// `-bufsize`
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub bufsize: Option<String>,

    /// Arbitrary post-codec flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_options: Option<OptionBag>,
    /// Legacy spelling of `output_options`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_options: Option<OptionBag>,

    /// Selects one of several hardware encoders of a kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_index: Option<u32>,

    /// Explicit input video stream, `-map 0:v:<n>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_stream_index: Option<u32>,
    /// Explicit input audio stream, `-map 0:a:<n>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_stream_index: Option<u32>,

    /// HLS segment duration in seconds
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub hls_time: Option<String>,
    /// HLS playlist length
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub hls_list_size: Option<String>,
    /// HLS segmenter flags
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub hls_flags: Option<String>,

    /// DVB tuner device path
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub dvb_device: Option<String>,
    /// DVB tuner frequency
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub dvb_frequency: Option<String>,
    /// DVB modulation
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub dvb_modulation: Option<String>,

    /// MPEG-TS multiplex rate override
    #[serde(default, deserialize_with = "de_stringish", skip_serializing_if = "Option::is_none")]
    pub muxrate: Option<String>,

    /// Keys we do not recognize; preserved for round-tripping, ignored
    /// during command synthesis.
    #[serde(flatten)]
    pub unknown: serde_json::Map<String, Value>,
}

impl EncoderParams {
    /// Parse from the stored JSON document, warning once per unknown key.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let params: EncoderParams = serde_json::from_value(value)?;
        for key in params.unknown.keys() {
            warn!("Ignoring unrecognized encoder parameter '{}'", key);
        }
        Ok(params)
    }

    /// Declared video bitrate parsed to bits per second, accepting the
    /// `2500k` / `2.5M` / plain-number spellings.
    pub fn video_bitrate_bps(&self) -> Option<u64> {
        self.video_bitrate.as_deref().and_then(parse_bitrate_bps)
    }
}

/// Parse `2500k`, `2.5M`, or `2500000` into bits per second.
pub fn parse_bitrate_bps(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (number, multiplier) = match value.chars().last() {
        Some('k') | Some('K') => (&value[..value.len() - 1], 1_000f64),
        Some('m') | Some('M') => (&value[..value.len() - 1], 1_000_000f64),
        _ => (value, 1f64),
    };
    let parsed: f64 = number.parse().ok()?;
    if parsed < 0.0 {
        return None;
    }
    Some((parsed * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_accepted_as_strings() {
        let params = EncoderParams::from_json(json!({
            "video_codec": "libx264",
            "crf": 23,
            "g": 50,
            "framerate": 25
        }))
        .unwrap();
        assert_eq!(params.crf.as_deref(), Some("23"));
        assert_eq!(params.g.as_deref(), Some("50"));
        assert_eq!(params.framerate.as_deref(), Some("25"));
    }

    #[test]
    fn test_unknown_keys_preserved_not_fatal() {
        let params = EncoderParams::from_json(json!({
            "video_codec": "copy",
            "experimental_knob": true
        }))
        .unwrap();
        assert_eq!(params.video_codec.as_deref(), Some("copy"));
        assert!(params.unknown.contains_key("experimental_knob"));
    }

    #[test]
    fn test_option_bag_map_expansion() {
        let bag: OptionBag =
            serde_json::from_value(json!({"fflags": "+genpts", "probesize": 1000000})).unwrap();
        let args = bag.expand();
        // serde_json maps iterate in key order
        assert_eq!(args, vec!["-fflags", "+genpts", "-probesize", "1000000"]);
    }

    #[test]
    fn test_option_bag_flag_without_value() {
        let bag: OptionBag = serde_json::from_value(json!({"re": null})).unwrap();
        assert_eq!(bag.expand(), vec!["-re"]);
    }

    #[test]
    fn test_option_bag_list_and_line() {
        let list: OptionBag = serde_json::from_value(json!(["-loglevel", "warning"])).unwrap();
        assert_eq!(list.expand(), vec!["-loglevel", "warning"]);

        let line: OptionBag = serde_json::from_value(json!("-loglevel warning")).unwrap();
        assert_eq!(line.expand(), vec!["-loglevel", "warning"]);
    }

    #[test]
    fn test_async_key_spelling() {
        let params = EncoderParams::from_json(json!({"async": 1})).unwrap();
        assert_eq!(params.audio_sync.as_deref(), Some("1"));
        let round = serde_json::to_value(&params).unwrap();
        assert_eq!(round.get("async"), Some(&json!("1")));
    }

    #[test]
    fn test_parse_bitrate_bps() {
        assert_eq!(parse_bitrate_bps("2500k"), Some(2_500_000));
        assert_eq!(parse_bitrate_bps("2.5M"), Some(2_500_000));
        assert_eq!(parse_bitrate_bps("800000"), Some(800_000));
        assert_eq!(parse_bitrate_bps("junk"), None);
    }
}
