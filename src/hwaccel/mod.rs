//! Hardware-acceleration capability probing
//!
//! Enumerates the hardware encoders FFmpeg can reach on this host by
//! combining three evidence sources:
//!
//! - the encoder list FFmpeg itself reports (`ffmpeg -hide_banner -encoders`)
//! - presence and readability of DRM render nodes under `/dev/dri`
//! - OS/vendor indicators for NVIDIA (device nodes, driver procfs)
//!
//! Results are memoised for a short TTL and can be invalidated on
//! request. The probe also answers the "effective codec for this
//! request" query used during command synthesis: software codec names
//! are substituted with their hardware counterparts when acceleration
//! is enabled and a matching backend is available.

mod probe;

pub use probe::CapabilityProbe;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hardware encoder family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccelKind {
    Nvenc,
    Qsv,
    Vaapi,
    Videotoolbox,
    Amf,
}

impl HwAccelKind {
    /// Suffix FFmpeg appends to codec names for this family.
    pub fn codec_suffix(&self) -> &'static str {
        match self {
            HwAccelKind::Nvenc => "nvenc",
            HwAccelKind::Qsv => "qsv",
            HwAccelKind::Vaapi => "vaapi",
            HwAccelKind::Videotoolbox => "videotoolbox",
            HwAccelKind::Amf => "amf",
        }
    }

    /// Classify an encoder name like `h264_nvenc`; `None` for software
    /// codecs.
    pub fn from_codec_name(name: &str) -> Option<Self> {
        let suffix = name.rsplit('_').next()?;
        match suffix {
            "nvenc" => Some(HwAccelKind::Nvenc),
            "qsv" => Some(HwAccelKind::Qsv),
            "vaapi" => Some(HwAccelKind::Vaapi),
            "videotoolbox" => Some(HwAccelKind::Videotoolbox),
            "amf" => Some(HwAccelKind::Amf),
            _ => None,
        }
    }
}

impl std::fmt::Display for HwAccelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.codec_suffix())
    }
}

/// One probed accelerator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwCapability {
    /// Encoder family
    pub kind: HwAccelKind,
    /// Index among accelerators of the same kind
    pub index: u32,
    /// Display name for operators
    pub name: String,
    /// Render device path (VAAPI/QSV)
    pub device_path: Option<PathBuf>,
    /// Encoder names FFmpeg reports for this family
    pub codecs: Vec<String>,
    /// False when the family was detected but its device is unusable
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_codec_name() {
        assert_eq!(
            HwAccelKind::from_codec_name("h264_nvenc"),
            Some(HwAccelKind::Nvenc)
        );
        assert_eq!(
            HwAccelKind::from_codec_name("hevc_vaapi"),
            Some(HwAccelKind::Vaapi)
        );
        assert_eq!(HwAccelKind::from_codec_name("libx264"), None);
        assert_eq!(HwAccelKind::from_codec_name("copy"), None);
    }
}
