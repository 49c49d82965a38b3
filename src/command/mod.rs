//! Encoder command synthesis
//!
//! Translates a channel record plus one output destination into the
//! argv for the external encoder. FFmpeg's CLI is ordering-sensitive;
//! the builder maintains the positional contract
//!
//! ```text
//! pre-input options < -i input < stream maps < codec selections
//!     < encoder tuning < post-output options < destination
//! ```
//!
//! Violating it silently changes flag meaning (a pre-input flag after
//! `-i` applies to the output instead), so every emission site below is
//! anchored to one of those sections.
//!
//! Hardware substitution happens before assembly: the capability probe
//! answers which codec to actually use, and the builder then emits the
//! kind-specific pre-input hwaccel arguments and post-codec encoder
//! arguments. VAAPI is fail-fast: a missing render device is an error
//! at build time, never a silent software downgrade.

use std::path::{Path, PathBuf};

use crate::channel::{Channel, EncoderParams, Output};
use crate::config::EncoderConfig;
use crate::error::Result;
use crate::hwaccel::{CapabilityProbe, HwAccelKind};

/// Default `-fflags` when the channel does not override them.
const DEFAULT_FFLAGS: &str = "+genpts";

/// MPEG-TS multiplex rate when neither an override nor a declared
/// bitrate is available (~10 Mbps).
const DEFAULT_MUXRATE: u64 = 10_080_000;

/// Audio headroom added to the declared video bitrate before the
/// muxrate safety factor is applied.
const MUXRATE_AUDIO_HEADROOM: u64 = 128_000;

/// Safety factor for computed muxrates.
const MUXRATE_FACTOR: f64 = 1.3;

/// HLS segmenter defaults: segment seconds, playlist length, flags.
const DEFAULT_HLS_TIME: &str = "2";
const DEFAULT_HLS_LIST_SIZE: &str = "5";
const DEFAULT_HLS_FLAGS: &str = "delete_segments";

/// The synthesized invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuiltCommand {
    /// Render for logs; arguments are space-joined without quoting.
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Builds encoder argv vectors from channel records.
pub struct CommandBuilder<'a> {
    config: &'a EncoderConfig,
    probe: &'a CapabilityProbe,
    media_root: &'a Path,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(
        config: &'a EncoderConfig,
        probe: &'a CapabilityProbe,
        media_root: &'a Path,
    ) -> Self {
        Self {
            config,
            probe,
            media_root,
        }
    }

    /// Directory owning a channel's output files.
    pub fn channel_dir(&self, channel: &Channel) -> PathBuf {
        self.media_root.join(channel.id.to_string())
    }

    /// Synthesize the invocation for one output of a channel.
    pub fn build(&self, channel: &Channel, output: &Output) -> Result<BuiltCommand> {
        let params = &channel.ffmpeg_params;
        let mut args: Vec<String> = Vec::with_capacity(48);

        // Resolve the effective video codec up front; its kind decides
        // the hwaccel arguments on both sides of the input.
        let requested_video = match output {
            Output::Hls {} => Some(
                params
                    .video_codec
                    .clone()
                    .unwrap_or_else(|| "libx264".to_string()),
            ),
            _ => params.video_codec.clone(),
        };
        let video_codec = self
            .probe
            .effective_video_codec(requested_video.as_deref());
        let hw_kind = video_codec
            .as_deref()
            .and_then(HwAccelKind::from_codec_name);
        let vaapi_device = match hw_kind {
            Some(HwAccelKind::Vaapi) => Some(self.probe.vaapi_device(params.gpu_index)?),
            _ => None,
        };

        // ---------------------------------------------------------------------
        // Pre-input options
        // ---------------------------------------------------------------------
        args.push("-fflags".into());
        args.push(
            params
                .fflags
                .clone()
                .unwrap_or_else(|| DEFAULT_FFLAGS.to_string()),
        );

        if let Output::Udp { realtime, .. } = output {
            let pace = match realtime {
                Some(explicit) => *explicit,
                None => !is_live_http_source(&channel.input_url),
            };
            if pace {
                args.push("-re".into());
            }
        }

        if let Some(bag) = &params.input_options {
            args.extend(bag.expand());
        }

        match hw_kind {
            Some(HwAccelKind::Nvenc) => {
                args.push("-hwaccel".into());
                args.push("cuda".into());
            }
            Some(HwAccelKind::Qsv) => {
                args.push("-hwaccel".into());
                args.push("qsv".into());
            }
            Some(HwAccelKind::Vaapi) => {
                args.push("-hwaccel".into());
                args.push("vaapi".into());
                if let Some(device) = &vaapi_device {
                    args.push("-vaapi_device".into());
                    args.push(device.display().to_string());
                }
            }
            Some(HwAccelKind::Videotoolbox) => {
                args.push("-hwaccel".into());
                args.push("videotoolbox".into());
            }
            Some(HwAccelKind::Amf) | None => {}
        }

        // DVB sources tune the input side
        if matches!(output, Output::Dvb {}) {
            if let Some(freq) = &params.dvb_frequency {
                args.push("-frequency".into());
                args.push(freq.clone());
            }
            if let Some(modulation) = &params.dvb_modulation {
                args.push("-modulation".into());
                args.push(modulation.clone());
            }
            args.push("-f".into());
            args.push("dvb".into());
        }

        // ---------------------------------------------------------------------
        // Input
        // ---------------------------------------------------------------------
        args.push("-i".into());
        let input = match output {
            Output::Dvb {} => params
                .dvb_device
                .clone()
                .unwrap_or_else(|| channel.input_url.clone()),
            _ => channel.input_url.clone(),
        };
        args.push(input);

        // ---------------------------------------------------------------------
        // Stream maps
        // ---------------------------------------------------------------------
        self.push_maps(&mut args, params, output);

        // ---------------------------------------------------------------------
        // Codec selection + encoder tuning
        // ---------------------------------------------------------------------
        let audio_codec = match output {
            Output::Hls {} => Some(
                params
                    .audio_codec
                    .clone()
                    .unwrap_or_else(|| "aac".to_string()),
            ),
            _ => params.audio_codec.clone(),
        };

        let plain_copy = is_copyish(video_codec.as_deref()) && is_copyish(audio_codec.as_deref());
        if plain_copy {
            args.push("-c".into());
            args.push("copy".into());
        } else {
            args.push("-c:v".into());
            args.push(video_codec.clone().unwrap_or_else(|| "copy".to_string()));
            self.push_video_tuning(&mut args, params, hw_kind);

            args.push("-c:a".into());
            args.push(audio_codec.clone().unwrap_or_else(|| "copy".to_string()));
            self.push_audio_tuning(&mut args, params);
        }

        // ---------------------------------------------------------------------
        // Post-output options + destination
        // ---------------------------------------------------------------------
        if let Some(bag) = &params.output_options {
            args.extend(bag.expand());
        }
        if let Some(bag) = &params.extra_options {
            args.extend(bag.expand());
        }

        let dir = self.channel_dir(channel);
        match output {
            Output::Udp {
                host,
                port,
                pkt_size,
                buffer_size,
                ..
            } => {
                args.push("-f".into());
                args.push("mpegts".into());
                args.push("-muxrate".into());
                args.push(mpegts_muxrate(params).to_string());
                args.push("-pcr_period".into());
                args.push("20".into());
                args.push("-pat_period".into());
                args.push("0.1".into());
                args.push("-streamid".into());
                args.push("0:0x100".into());
                args.push("-streamid".into());
                args.push("1:0x101".into());
                args.push("-mpegts_flags".into());
                args.push("resend_headers".into());
                args.push("-flush_packets".into());
                args.push("1".into());
                if params.bufsize.is_none() {
                    args.push("-bufsize".into());
                    args.push("65536".into());
                }
                args.push(udp_destination(host, *port, *pkt_size, *buffer_size));
            }
            Output::Hls {} => {
                args.push("-f".into());
                args.push("hls".into());
                args.push("-hls_time".into());
                args.push(
                    params
                        .hls_time
                        .clone()
                        .unwrap_or_else(|| DEFAULT_HLS_TIME.to_string()),
                );
                args.push("-hls_list_size".into());
                args.push(
                    params
                        .hls_list_size
                        .clone()
                        .unwrap_or_else(|| DEFAULT_HLS_LIST_SIZE.to_string()),
                );
                args.push("-hls_flags".into());
                args.push(
                    params
                        .hls_flags
                        .clone()
                        .unwrap_or_else(|| DEFAULT_HLS_FLAGS.to_string()),
                );
                args.push(dir.join("index.m3u8").display().to_string());
            }
            Output::Dvb {} | Output::File {} => {
                args.push("-f".into());
                args.push("mpegts".into());
                args.push(dir.join("output.ts").display().to_string());
            }
        }

        Ok(BuiltCommand {
            program: self.config.ffmpeg_path.clone(),
            args,
        })
    }

    fn push_maps(&self, args: &mut Vec<String>, params: &EncoderParams, output: &Output) {
        if let Some(index) = params.video_stream_index {
            args.push("-map".into());
            args.push(format!("0:v:{}", index));
        }
        if let Some(index) = params.audio_stream_index {
            args.push("-map".into());
            args.push(format!("0:a:{}", index));
        }
        if params.video_stream_index.is_some() || params.audio_stream_index.is_some() {
            return;
        }

        if let Output::Udp {
            hls_program_index,
            map_video,
            map_audio,
            ..
        } = output
        {
            if let Some(program) = hls_program_index {
                args.push("-map".into());
                args.push(format!("0:p:{}", program));
                return;
            }
            if map_video.unwrap_or(true) {
                args.push("-map".into());
                args.push("0:v:0".into());
            }
            if map_audio.unwrap_or(true) {
                args.push("-map".into());
                args.push("0:a:0".into());
            }
        }
    }

    fn push_video_tuning(
        &self,
        args: &mut Vec<String>,
        params: &EncoderParams,
        hw_kind: Option<HwAccelKind>,
    ) {
        // NVENC takes its device index right after the codec selection
        if hw_kind == Some(HwAccelKind::Nvenc) {
            if let Some(index) = params.gpu_index {
                args.push("-gpu".into());
                args.push(index.to_string());
            }
        }

        if let Some(preset) = self.effective_preset(params, hw_kind) {
            args.push("-preset".into());
            args.push(preset);
        }
        if let Some(tune) = &params.tune {
            args.push("-tune".into());
            args.push(tune.clone());
        }
        if let Some(profile) = &params.profile {
            args.push("-profile:v".into());
            args.push(profile.clone());
        }
        if let Some(level) = &params.level {
            args.push("-level".into());
            args.push(level.clone());
        }
        if let Some(g) = &params.g {
            args.push("-g".into());
            args.push(g.clone());
        }
        if let Some(keyint) = &params.keyint_min {
            args.push("-keyint_min".into());
            args.push(keyint.clone());
        }
        if let Some(sc) = &params.sc_threshold {
            args.push("-sc_threshold".into());
            args.push(sc.clone());
        }
        if let Some(vsync) = &params.vsync {
            args.push("-vsync".into());
            args.push(vsync.clone());
        }
        if let Some(crf) = &params.crf {
            args.push("-crf".into());
            args.push(crf.clone());
        }
        if let Some(qp) = &params.qp {
            args.push("-qp".into());
            args.push(qp.clone());
        }
        if let Some(bitrate) = &params.video_bitrate {
            args.push("-b:v".into());
            args.push(bitrate.clone());
        }
        if let Some(maxrate) = &params.maxrate {
            args.push("-maxrate".into());
            args.push(maxrate.clone());
        }
        if let Some(minrate) = &params.minrate {
            args.push("-minrate".into());
            args.push(minrate.clone());
        }
        if let Some(bufsize) = &params.bufsize {
            args.push("-bufsize".into());
            args.push(bufsize.clone());
        }
        if let Some(resolution) = &params.resolution {
            args.push("-s".into());
            args.push(resolution.clone());
        }
        if let Some(framerate) = &params.framerate {
            args.push("-r".into());
            args.push(framerate.clone());
        }

        match (&params.video_filters, hw_kind) {
            (Some(filters), _) => {
                args.push("-vf".into());
                args.push(filters.clone());
            }
            // VAAPI encodes hardware surfaces; software frames must be
            // uploaded first
            (None, Some(HwAccelKind::Vaapi)) => {
                args.push("-vf".into());
                args.push("format=nv12,hwupload".into());
            }
            _ => {}
        }
    }

    fn push_audio_tuning(&self, args: &mut Vec<String>, params: &EncoderParams) {
        if let Some(bitrate) = &params.audio_bitrate {
            args.push("-b:a".into());
            args.push(bitrate.clone());
        }
        if let Some(sync) = &params.audio_sync {
            args.push("-async".into());
            args.push(sync.clone());
        }
        if let Some(filters) = &params.audio_filters {
            args.push("-af".into());
            args.push(filters.clone());
        }
    }

    /// Preset after NVENC remapping and the environment-level override.
    fn effective_preset(
        &self,
        params: &EncoderParams,
        hw_kind: Option<HwAccelKind>,
    ) -> Option<String> {
        if hw_kind == Some(HwAccelKind::Nvenc) {
            if let Some(override_preset) = &self.config.nvenc_preset {
                return Some(override_preset.clone());
            }
            return params
                .preset
                .as_deref()
                .map(|preset| map_nvenc_preset(preset).to_string());
        }
        params.preset.clone()
    }
}

/// Map libx264-style presets onto the NVENC `p1`..`p7` scale.
/// Already-mapped presets pass through; unknown names fall back to the
/// balanced middle.
pub fn map_nvenc_preset(preset: &str) -> &str {
    match preset {
        "p1" | "p2" | "p3" | "p4" | "p5" | "p6" | "p7" => preset,
        "ultrafast" => "p1",
        "superfast" => "p2",
        "veryfast" => "p2",
        "faster" => "p3",
        "fast" => "p4",
        "medium" => "p4",
        "slow" => "p5",
        "slower" => "p6",
        "veryslow" => "p7",
        _ => "p4",
    }
}

/// A live HTTP/HLS source already paces itself; `-re` would starve it.
fn is_live_http_source(input_url: &str) -> bool {
    let lower = input_url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.ends_with(".m3u8")
}

fn is_copyish(codec: Option<&str>) -> bool {
    matches!(codec, None | Some("copy"))
}

/// MPEG-TS muxrate: explicit override, else computed from the declared
/// video bitrate with audio headroom and safety factor, else the
/// default.
fn mpegts_muxrate(params: &EncoderParams) -> u64 {
    if let Some(rate) = params
        .muxrate
        .as_deref()
        .and_then(crate::channel::params::parse_bitrate_bps)
    {
        return rate;
    }
    if let Some(video_bps) = params.video_bitrate_bps() {
        return ((video_bps + MUXRATE_AUDIO_HEADROOM) as f64 * MUXRATE_FACTOR).ceil() as u64;
    }
    DEFAULT_MUXRATE
}

fn udp_destination(
    host: &str,
    port: u16,
    pkt_size: Option<u32>,
    buffer_size: Option<u32>,
) -> String {
    let mut url = format!("udp://{}:{}", host, port);
    let mut sep = '?';
    if let Some(pkt) = pkt_size {
        url.push(sep);
        url.push_str(&format!("pkt_size={}", pkt));
        sep = '&';
    }
    if let Some(buf) = buffer_size {
        url.push(sep);
        url.push_str(&format!("buffer_size={}", buf));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelDraft, ChannelStatus};
    use crate::hwaccel::HwCapability;
    use serde_json::json;
    use uuid::Uuid;

    fn encoder_config() -> EncoderConfig {
        EncoderConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            hwaccel_enabled: true,
            hwaccel_auto: false,
            nvenc_preset: None,
            vaapi_default_device: PathBuf::from("/dev/dri/renderD128"),
        }
    }

    fn nvenc_cap() -> HwCapability {
        HwCapability {
            kind: HwAccelKind::Nvenc,
            index: 0,
            name: "NVIDIA NVENC".into(),
            device_path: None,
            codecs: vec!["h264_nvenc".into(), "hevc_nvenc".into()],
            available: true,
        }
    }

    fn udp_output(host: &str, port: u16) -> Output {
        Output::Udp {
            host: host.into(),
            port,
            pkt_size: None,
            buffer_size: None,
            hls_program_index: None,
            map_video: None,
            map_audio: None,
            realtime: None,
        }
    }

    fn channel(input_url: &str, params: serde_json::Value, output: Output) -> Channel {
        let mut channel = ChannelDraft {
            name: "test".into(),
            input_url: input_url.into(),
            auto_restart: false,
            ffmpeg_params: EncoderParams::from_json(params).unwrap(),
            outputs: vec![output],
        }
        .into_channel();
        channel.id = Uuid::nil();
        channel.status = ChannelStatus::Stopped;
        channel
    }

    fn build(channel: &Channel, probe_caps: Vec<HwCapability>) -> BuiltCommand {
        let config = encoder_config();
        let probe = CapabilityProbe::new(config.clone());
        probe.prime(probe_caps);
        let media_root = PathBuf::from("/var/lib/restreamd/media");
        let builder = CommandBuilder::new(&config, &probe, &media_root);
        builder
            .build(channel, &channel.outputs[0].clone())
            .unwrap()
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter()
            .position(|a| a == flag)
            .unwrap_or_else(|| panic!("missing {} in {:?}", flag, args))
    }

    #[test]
    fn test_udp_passthrough_live_hls_source() {
        let channel = channel(
            "https://ex/live.m3u8",
            json!({}),
            udp_output("10.0.0.1", 5000),
        );
        let built = build(&channel, vec![]);
        let args = &built.args;

        assert!(!args.contains(&"-re".to_string()), "live source must not pace");
        let fflags = position(args, "-fflags");
        assert_eq!(args[fflags + 1], "+genpts");

        let maps: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-map")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(maps.len(), 2);
        assert_eq!(args[maps[0] + 1], "0:v:0");
        assert_eq!(args[maps[1] + 1], "0:a:0");

        let c = position(args, "-c");
        assert_eq!(args[c + 1], "copy");

        let f = position(args, "-f");
        assert_eq!(args[f + 1], "mpegts");
        let muxrate = position(args, "-muxrate");
        assert_eq!(args[muxrate + 1], "10080000");

        assert_eq!(args.last().unwrap(), "udp://10.0.0.1:5000");
    }

    #[test]
    fn test_udp_non_live_source_paces() {
        let channel = channel(
            "/srv/media/movie.ts",
            json!({}),
            udp_output("10.0.0.1", 5000),
        );
        let built = build(&channel, vec![]);
        assert!(built.args.contains(&"-re".to_string()));
        // -re stays pre-input
        assert!(position(&built.args, "-re") < position(&built.args, "-i"));
    }

    #[test]
    fn test_udp_realtime_false_disables_pacing() {
        let output = Output::Udp {
            host: "10.0.0.1".into(),
            port: 5000,
            pkt_size: None,
            buffer_size: None,
            hls_program_index: None,
            map_video: None,
            map_audio: None,
            realtime: Some(false),
        };
        let channel = channel("/srv/media/movie.ts", json!({}), output);
        let built = build(&channel, vec![]);
        assert!(!built.args.contains(&"-re".to_string()));
    }

    #[test]
    fn test_udp_destination_query_params() {
        let output = Output::Udp {
            host: "239.0.0.1".into(),
            port: 1234,
            pkt_size: Some(1316),
            buffer_size: Some(65536),
            hls_program_index: None,
            map_video: None,
            map_audio: None,
            realtime: None,
        };
        let channel = channel("https://ex/live.m3u8", json!({}), output);
        let built = build(&channel, vec![]);
        assert_eq!(
            built.args.last().unwrap(),
            "udp://239.0.0.1:1234?pkt_size=1316&buffer_size=65536"
        );
    }

    #[test]
    fn test_udp_program_index_map() {
        let output = Output::Udp {
            host: "10.0.0.1".into(),
            port: 5000,
            pkt_size: None,
            buffer_size: None,
            hls_program_index: Some(2),
            map_video: None,
            map_audio: None,
            realtime: None,
        };
        let channel = channel("https://ex/live.m3u8", json!({}), output);
        let built = build(&channel, vec![]);
        let map = position(&built.args, "-map");
        assert_eq!(built.args[map + 1], "0:p:2");
        assert!(!built.args.contains(&"0:v:0".to_string()));
    }

    #[test]
    fn test_explicit_stream_indices_win() {
        let channel = channel(
            "https://ex/live.m3u8",
            json!({"video_stream_index": 1, "audio_stream_index": 3}),
            udp_output("10.0.0.1", 5000),
        );
        let built = build(&channel, vec![]);
        let maps: Vec<&String> = built
            .args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-map")
            .map(|(i, _)| &built.args[i + 1])
            .collect();
        assert_eq!(maps, vec!["0:v:1", "0:a:3"]);
    }

    #[test]
    fn test_muxrate_computed_from_bitrate() {
        let channel = channel(
            "https://ex/live.m3u8",
            json!({"video_codec": "libx264", "video_bitrate": "2500k"}),
            udp_output("10.0.0.1", 5000),
        );
        let built = build(&channel, vec![]);
        let muxrate = position(&built.args, "-muxrate");
        // ceil((2_500_000 + 128_000) * 1.3)
        assert_eq!(built.args[muxrate + 1], "3416400");
    }

    #[test]
    fn test_muxrate_explicit_override() {
        let channel = channel(
            "https://ex/live.m3u8",
            json!({"muxrate": "8M"}),
            udp_output("10.0.0.1", 5000),
        );
        let built = build(&channel, vec![]);
        let muxrate = position(&built.args, "-muxrate");
        assert_eq!(built.args[muxrate + 1], "8000000");
    }

    #[test]
    fn test_hls_transcode_with_nvenc_substitution() {
        let channel = channel(
            "udp://239.0.0.1:1234",
            json!({"video_codec": "libx264", "preset": "veryfast"}),
            Output::Hls {},
        );
        let built = build(&channel, vec![nvenc_cap()]);
        let args = &built.args;

        let cv = position(args, "-c:v");
        assert_eq!(args[cv + 1], "h264_nvenc");
        assert!(!args.contains(&"libx264".to_string()));

        let preset = position(args, "-preset");
        assert_eq!(args[preset + 1], "p2");

        let ca = position(args, "-c:a");
        assert_eq!(args[ca + 1], "aac");

        assert!(args.last().unwrap().ends_with("/index.m3u8"));
        let f = position(args, "-f");
        assert_eq!(args[f + 1], "hls");
        let hls_time = position(args, "-hls_time");
        assert_eq!(args[hls_time + 1], "2");
        let hls_flags = position(args, "-hls_flags");
        assert_eq!(args[hls_flags + 1], "delete_segments");
    }

    #[test]
    fn test_hls_defaults_to_software_h264_and_aac() {
        let channel = channel("udp://239.0.0.1:1234", json!({}), Output::Hls {});
        let built = build(&channel, vec![]);
        let cv = position(&built.args, "-c:v");
        assert_eq!(built.args[cv + 1], "libx264");
        let ca = position(&built.args, "-c:a");
        assert_eq!(built.args[ca + 1], "aac");
    }

    #[test]
    fn test_nvenc_env_override_supersedes_mapping() {
        let mut config = encoder_config();
        config.nvenc_preset = Some("p7".to_string());
        let probe = CapabilityProbe::new(config.clone());
        probe.prime(vec![nvenc_cap()]);
        let media_root = PathBuf::from("/tmp/media");
        let builder = CommandBuilder::new(&config, &probe, &media_root);

        let channel = channel(
            "udp://239.0.0.1:1234",
            json!({"video_codec": "libx264", "preset": "veryfast"}),
            Output::Hls {},
        );
        let built = builder
            .build(&channel, &channel.outputs[0].clone())
            .unwrap();
        let preset = position(&built.args, "-preset");
        assert_eq!(built.args[preset + 1], "p7");
    }

    #[test]
    fn test_nvenc_gpu_index_after_codec() {
        let channel = channel(
            "udp://239.0.0.1:1234",
            json!({"video_codec": "libx264", "gpu_index": 1}),
            Output::Hls {},
        );
        let built = build(&channel, vec![nvenc_cap()]);
        let cv = position(&built.args, "-c:v");
        let gpu = position(&built.args, "-gpu");
        assert_eq!(built.args[gpu + 1], "1");
        assert!(gpu > cv);
    }

    #[test]
    fn test_vaapi_fail_fast_without_device() {
        let mut config = encoder_config();
        config.vaapi_default_device = PathBuf::from("/nonexistent/renderD999");
        let probe = CapabilityProbe::new(config.clone());
        probe.prime(vec![HwCapability {
            kind: HwAccelKind::Vaapi,
            index: 7,
            name: "VAAPI render node".into(),
            device_path: Some(PathBuf::from("/nonexistent/renderD999")),
            codecs: vec!["h264_vaapi".into()],
            available: false,
        }]);
        let media_root = PathBuf::from("/tmp/media");
        let builder = CommandBuilder::new(&config, &probe, &media_root);

        let channel = channel(
            "udp://239.0.0.1:1234",
            json!({"video_codec": "h264_vaapi", "gpu_index": 7}),
            udp_output("10.0.0.1", 5000),
        );
        let err = builder
            .build(&channel, &channel.outputs[0].clone())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Resource);
    }

    #[test]
    fn test_dvb_output_tunes_input_side() {
        let channel = channel(
            "ignored",
            json!({
                "dvb_device": "/dev/dvb/adapter0/frontend0",
                "dvb_frequency": 474000000u64,
                "dvb_modulation": "QAM64"
            }),
            Output::Dvb {},
        );
        let built = build(&channel, vec![]);
        let args = &built.args;

        let f_positions: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-f")
            .map(|(i, _)| i)
            .collect();
        let i = position(args, "-i");
        assert_eq!(args[i + 1], "/dev/dvb/adapter0/frontend0");
        // first -f (dvb) before input, second (mpegts) after
        assert_eq!(args[f_positions[0] + 1], "dvb");
        assert!(f_positions[0] < i);
        assert_eq!(args[f_positions[1] + 1], "mpegts");
        assert!(f_positions[1] > i);

        let freq = position(args, "-frequency");
        assert_eq!(args[freq + 1], "474000000");
        assert!(freq < i);
        // DVB keeps the source's muxrate omission
        assert!(!args.contains(&"-muxrate".to_string()));
    }

    #[test]
    fn test_file_output_copies_by_default() {
        let channel = channel("udp://239.0.0.1:1234", json!({}), Output::File {});
        let built = build(&channel, vec![]);
        let c = position(&built.args, "-c");
        assert_eq!(built.args[c + 1], "copy");
        assert!(built.args.last().unwrap().ends_with("/output.ts"));
    }

    #[test]
    fn test_option_bags_expand_in_their_sections() {
        let channel = channel(
            "https://ex/live.m3u8",
            json!({
                "video_codec": "libx264",
                "input_options": {"probesize": 5000000},
                "output_options": {"max_muxing_queue_size": 1024}
            }),
            udp_output("10.0.0.1", 5000),
        );
        let built = build(&channel, vec![]);
        let args = &built.args;

        let probesize = position(args, "-probesize");
        let i = position(args, "-i");
        let cv = position(args, "-c:v");
        let queue = position(args, "-max_muxing_queue_size");
        let f = position(args, "-f");

        assert!(probesize < i);
        assert!(cv < queue);
        assert!(queue < f);
    }

    #[test]
    fn test_argv_positional_contract() {
        let channel = channel(
            "/srv/media/movie.ts",
            json!({
                "video_codec": "libx264",
                "preset": "fast",
                "crf": 23,
                "audio_codec": "aac"
            }),
            udp_output("10.0.0.1", 5000),
        );
        let built = build(&channel, vec![]);
        let args = &built.args;

        let fflags = position(args, "-fflags");
        let i = position(args, "-i");
        let map = position(args, "-map");
        let cv = position(args, "-c:v");
        let preset = position(args, "-preset");
        let f = position(args, "-f");
        let destination = args.len() - 1;

        assert!(fflags < i, "pre-input before -i");
        assert!(i < map, "-i before maps");
        assert!(map < cv, "maps before codec selection");
        assert!(cv < preset, "codec before tuning");
        assert!(preset < f, "tuning before output format");
        assert!(f < destination, "format before destination");
    }

    #[test]
    fn test_nvenc_preset_table() {
        assert_eq!(map_nvenc_preset("ultrafast"), "p1");
        assert_eq!(map_nvenc_preset("veryfast"), "p2");
        assert_eq!(map_nvenc_preset("medium"), "p4");
        assert_eq!(map_nvenc_preset("veryslow"), "p7");
        assert_eq!(map_nvenc_preset("p3"), "p3");
        assert_eq!(map_nvenc_preset("weird"), "p4");
    }
}
