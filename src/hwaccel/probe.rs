//! Capability probe implementation
//!
//! Detection is cheap but not free (one FFmpeg invocation plus a
//! directory scan), so results are cached for [`CACHE_TTL`] and refreshed
//! lazily. `invalidate` drops the cache so the next query re-probes,
//! e.g. after a driver install.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::EncoderConfig;
use crate::error::{Error, Result};

use super::{HwAccelKind, HwCapability};

/// How long a probe result stays valid.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Timeout for the FFmpeg introspection call.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// First DRM render node minor number.
const RENDER_NODE_BASE: u32 = 128;

/// Selection order for hardware substitution.
const SUBSTITUTION_ORDER: [HwAccelKind; 4] = [
    HwAccelKind::Nvenc,
    HwAccelKind::Qsv,
    HwAccelKind::Vaapi,
    HwAccelKind::Videotoolbox,
];

struct CacheEntry {
    taken_at: Instant,
    capabilities: Vec<HwCapability>,
}

/// Probes and memoises the host's hardware-encoding capabilities.
pub struct CapabilityProbe {
    config: EncoderConfig,
    cache: RwLock<Option<CacheEntry>>,
}

impl CapabilityProbe {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(None),
        }
    }

    /// Cached capabilities, refreshing when stale or absent.
    pub async fn capabilities(&self) -> Vec<HwCapability> {
        if let Some(entry) = self.cache.read().as_ref() {
            if entry.taken_at.elapsed() < CACHE_TTL {
                return entry.capabilities.clone();
            }
        }
        self.refresh().await
    }

    /// Force a re-probe and replace the cache.
    pub async fn refresh(&self) -> Vec<HwCapability> {
        let capabilities = self.detect().await;
        debug!(
            "Hardware probe found {} accelerator(s): {:?}",
            capabilities.len(),
            capabilities
                .iter()
                .map(|c| format!("{}[{}]", c.kind, c.index))
                .collect::<Vec<_>>()
        );
        *self.cache.write() = Some(CacheEntry {
            taken_at: Instant::now(),
            capabilities: capabilities.clone(),
        });
        capabilities
    }

    /// Drop the cache; the next query re-probes.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    /// Replace the cache with a known capability set without probing.
    /// Used by tests and dry-run tooling.
    pub fn prime(&self, capabilities: Vec<HwCapability>) {
        *self.cache.write() = Some(CacheEntry {
            taken_at: Instant::now(),
            capabilities,
        });
    }

    /// Synchronous view of the cache (empty before the first refresh).
    /// Command synthesis is a pure function and reads only this view;
    /// callers that need fresh data await [`Self::capabilities`] first.
    pub fn cached(&self) -> Vec<HwCapability> {
        self.cache
            .read()
            .as_ref()
            .map(|entry| entry.capabilities.clone())
            .unwrap_or_default()
    }

    // =========================================================================
    // Detection
    // =========================================================================

    async fn detect(&self) -> Vec<HwCapability> {
        let encoders = self.list_ffmpeg_encoders().await;
        let mut capabilities = Vec::new();

        // NVENC: driver indicators + encoder support
        let nvenc_codecs = codecs_for(&encoders, HwAccelKind::Nvenc);
        if !nvenc_codecs.is_empty() && nvidia_present() {
            capabilities.push(HwCapability {
                kind: HwAccelKind::Nvenc,
                index: 0,
                name: "NVIDIA NVENC".to_string(),
                device_path: None,
                codecs: nvenc_codecs,
                available: true,
            });
        }

        // VAAPI and QSV: DRM render nodes + encoder support
        let render_nodes = enumerate_render_nodes();
        let vaapi_codecs = codecs_for(&encoders, HwAccelKind::Vaapi);
        let qsv_codecs = codecs_for(&encoders, HwAccelKind::Qsv);
        for (index, node) in render_nodes.iter().enumerate() {
            let readable = device_readable(node);
            if !vaapi_codecs.is_empty() {
                capabilities.push(HwCapability {
                    kind: HwAccelKind::Vaapi,
                    index: index as u32,
                    name: format!("VAAPI render node {}", node.display()),
                    device_path: Some(node.clone()),
                    codecs: vaapi_codecs.clone(),
                    available: readable,
                });
            }
            if !qsv_codecs.is_empty() {
                capabilities.push(HwCapability {
                    kind: HwAccelKind::Qsv,
                    index: index as u32,
                    name: format!("Intel QuickSync on {}", node.display()),
                    device_path: Some(node.clone()),
                    codecs: qsv_codecs.clone(),
                    available: readable,
                });
            }
        }

        // VideoToolbox: encoder support implies availability (macOS)
        let vt_codecs = codecs_for(&encoders, HwAccelKind::Videotoolbox);
        if !vt_codecs.is_empty() && cfg!(target_os = "macos") {
            capabilities.push(HwCapability {
                kind: HwAccelKind::Videotoolbox,
                index: 0,
                name: "Apple VideoToolbox".to_string(),
                device_path: None,
                codecs: vt_codecs,
                available: true,
            });
        }

        // AMF: encoder support only (Windows/AMD)
        let amf_codecs = codecs_for(&encoders, HwAccelKind::Amf);
        if !amf_codecs.is_empty() {
            capabilities.push(HwCapability {
                kind: HwAccelKind::Amf,
                index: 0,
                name: "AMD AMF".to_string(),
                device_path: None,
                codecs: amf_codecs,
                available: true,
            });
        }

        capabilities
    }

    /// Video encoder names from `ffmpeg -hide_banner -encoders`.
    async fn list_ffmpeg_encoders(&self) -> BTreeSet<String> {
        let output = tokio::time::timeout(
            PROBE_TIMEOUT,
            Command::new(&self.config.ffmpeg_path)
                .args(["-hide_banner", "-encoders"])
                .output(),
        )
        .await;

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to run {} -encoders: {}", self.config.ffmpeg_path, e);
                return BTreeSet::new();
            }
            Err(_) => {
                warn!(
                    "{} -encoders timed out after {:?}",
                    self.config.ffmpeg_path, PROBE_TIMEOUT
                );
                return BTreeSet::new();
            }
        };

        parse_encoder_list(&String::from_utf8_lossy(&output.stdout))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Effective video codec for a request, applying hardware
    /// substitution per the configured policy. Reads the cached probe.
    ///
    /// - acceleration disabled: the request passes through
    /// - already-hardware names pass through unchanged
    /// - `h264`/`libx264` and `hevc`/`h265`/`libx265` map to the first
    ///   available family in NVENC → QSV → VAAPI → VideoToolbox order
    /// - `copy`/absent requests substitute only when `hwaccel_auto` is on
    pub fn effective_video_codec(&self, requested: Option<&str>) -> Option<String> {
        let requested = requested.filter(|s| !s.is_empty());
        if !self.config.hwaccel_enabled {
            return requested.map(str::to_string);
        }
        if let Some(name) = requested {
            if HwAccelKind::from_codec_name(name).is_some() {
                return Some(name.to_string());
            }
        }

        let family = match requested {
            Some("h264") | Some("libx264") => Some("h264"),
            Some("hevc") | Some("h265") | Some("libx265") => Some("hevc"),
            Some("copy") | None if self.config.hwaccel_auto => Some("h264"),
            _ => None,
        };

        let Some(family) = family else {
            return requested.map(str::to_string);
        };

        let capabilities = self.cached();
        for kind in SUBSTITUTION_ORDER {
            let candidate = format!("{}_{}", family, kind.codec_suffix());
            let supported = capabilities.iter().any(|cap| {
                cap.kind == kind && cap.available && cap.codecs.iter().any(|c| c == &candidate)
            });
            if supported {
                return Some(candidate);
            }
        }

        requested.map(str::to_string)
    }

    /// Resolve the VAAPI render device for a requested gpu index.
    ///
    /// Resolution order: enumerated device of that index, the
    /// conventional `/dev/dri/renderD{128+index}` path, then the
    /// configured default. Readability is verified at each step; running
    /// out of candidates is a fatal resource error, never a silent
    /// downgrade.
    pub fn vaapi_device(&self, gpu_index: Option<u32>) -> Result<PathBuf> {
        let index = gpu_index.unwrap_or(0);

        if let Some(device) = self
            .cached()
            .iter()
            .find(|cap| cap.kind == HwAccelKind::Vaapi && cap.index == index)
            .and_then(|cap| cap.device_path.clone())
        {
            if device_readable(&device) {
                return Ok(device);
            }
        }

        let conventional = PathBuf::from(format!("/dev/dri/renderD{}", RENDER_NODE_BASE + index));
        if device_readable(&conventional) {
            return Ok(conventional);
        }

        let fallback = self.config.vaapi_default_device.clone();
        if device_readable(&fallback) {
            return Ok(fallback);
        }

        Err(Error::DeviceNotAccessible {
            path: conventional.display().to_string(),
            reason: "no readable VAAPI render device".to_string(),
        })
    }
}

/// Parse `ffmpeg -encoders` output into video encoder names.
///
/// Lines look like ` V....D h264_nvenc  NVIDIA NVENC H.264 encoder`.
fn parse_encoder_list(stdout: &str) -> BTreeSet<String> {
    let mut encoders = BTreeSet::new();
    for line in stdout.lines() {
        let line = line.trim_end();
        if line.len() < 8 {
            continue;
        }
        let flags = &line[..7];
        if !flags.trim_start().starts_with('V') {
            continue;
        }
        if let Some(name) = line[7..].trim().split_whitespace().next() {
            // Skip the legend block (" V..... = Video")
            if name
                .chars()
                .next()
                .map(|c| c.is_ascii_alphanumeric())
                .unwrap_or(false)
            {
                encoders.insert(name.to_string());
            }
        }
    }
    encoders
}

fn codecs_for(encoders: &BTreeSet<String>, kind: HwAccelKind) -> Vec<String> {
    let suffix = format!("_{}", kind.codec_suffix());
    encoders
        .iter()
        .filter(|name| name.ends_with(&suffix))
        .cloned()
        .collect()
}

/// DRM render nodes in ascending minor order.
fn enumerate_render_nodes() -> Vec<PathBuf> {
    let mut nodes: Vec<PathBuf> = std::fs::read_dir("/dev/dri")
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("renderD"))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    nodes.sort();
    nodes
}

fn device_readable(path: &Path) -> bool {
    std::fs::OpenOptions::new().read(true).open(path).is_ok()
}

fn nvidia_present() -> bool {
    ["/dev/nvidia0", "/dev/nvidiactl", "/proc/driver/nvidia/version"]
        .iter()
        .any(|p| Path::new(p).exists())
}
