//! Compression settings snapshots.
//!
//! Settings are plain values: every edit produces a new snapshot, so the
//! supervisor can compare the snapshot an in-flight task was built from with
//! the one the user currently wants.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ffmpeg::probe::MediaKind;

pub const QUALITY_RANGE: RangeInclusive<u32> = 1..=100;
pub const VIDEO_BITRATE_RANGE_KBPS: RangeInclusive<u32> = 100..=100_000;
pub const AUDIO_BITRATE_RANGE_KBPS: RangeInclusive<u32> = 32..=320;

/// Output resolution relative to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum ScaleFactor {
    #[default]
    Full,
    Half,
    Quarter,
}

impl ScaleFactor {
    pub fn value(self) -> f64 {
        match self {
            Self::Full => 1.0,
            Self::Half => 0.5,
            Self::Quarter => 0.25,
        }
    }

    pub fn is_downscale(self) -> bool {
        self != Self::Full
    }
}

impl TryFrom<f64> for ScaleFactor {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        match value {
            v if (v - 1.0).abs() < f64::EPSILON => Ok(Self::Full),
            v if (v - 0.5).abs() < f64::EPSILON => Ok(Self::Half),
            v if (v - 0.25).abs() < f64::EPSILON => Ok(Self::Quarter),
            other => Err(format!("scale must be 1.0, 0.5 or 0.25 (got {})", other)),
        }
    }
}

impl From<ScaleFactor> for f64 {
    fn from(scale: ScaleFactor) -> Self {
        scale.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    #[serde(rename = "mp4")]
    Mp4H264,
    #[serde(rename = "hevc")]
    Mp4Hevc,
    #[serde(rename = "webm")]
    WebmVp9,
    #[serde(rename = "av1")]
    Av1,
}

impl VideoFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebmVp9 => "webm",
            Self::Mp4H264 | Self::Mp4Hevc | Self::Av1 => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Opus,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "m4a",
            Self::Opus => "opus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub format: VideoFormat,
    pub quality: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub scale: ScaleFactor,
    #[serde(default)]
    pub remove_audio: bool,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            format: VideoFormat::Mp4H264,
            quality: 75,
            bitrate_kbps: None,
            scale: ScaleFactor::Full,
            remove_audio: false,
        }
    }
}

impl VideoSettings {
    pub fn with_format(self, format: VideoFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_quality(self, quality: u32) -> Self {
        Self { quality, ..self }
    }

    pub fn with_bitrate(self, bitrate_kbps: Option<u32>) -> Self {
        Self {
            bitrate_kbps,
            ..self
        }
    }

    pub fn with_scale(self, scale: ScaleFactor) -> Self {
        Self { scale, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSettings {
    pub format: ImageFormat,
    pub quality: u32,
    #[serde(default)]
    pub scale: ScaleFactor,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            format: ImageFormat::Jpeg,
            quality: 80,
            scale: ScaleFactor::Full,
        }
    }
}

impl ImageSettings {
    pub fn with_format(self, format: ImageFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_quality(self, quality: u32) -> Self {
        Self { quality, ..self }
    }

    pub fn with_scale(self, scale: ScaleFactor) -> Self {
        Self { scale, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub format: AudioFormat,
    pub bitrate_kbps: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            bitrate_kbps: 128,
        }
    }
}

impl AudioSettings {
    pub fn with_format(self, format: AudioFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_bitrate(self, bitrate_kbps: u32) -> Self {
        Self {
            bitrate_kbps,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CompressionSettings {
    Video(VideoSettings),
    Image(ImageSettings),
    Audio(AudioSettings),
}

impl CompressionSettings {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video(_) => MediaKind::Video,
            Self::Image(_) => MediaKind::Image,
            Self::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn output_extension(&self) -> &'static str {
        match self {
            Self::Video(v) => v.format.extension(),
            Self::Image(i) => i.format.extension(),
            Self::Audio(a) => a.format.extension(),
        }
    }

    /// Default snapshot for a probed media kind. `Unknown` has no editor.
    pub fn default_for(kind: MediaKind) -> Option<Self> {
        match kind {
            MediaKind::Video => Some(Self::Video(VideoSettings::default())),
            MediaKind::Image => Some(Self::Image(ImageSettings::default())),
            MediaKind::Audio => Some(Self::Audio(AudioSettings::default())),
            MediaKind::Unknown => None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            Self::Video(v) => {
                check_range("quality", v.quality, &QUALITY_RANGE)?;
                if let Some(bitrate) = v.bitrate_kbps {
                    check_range("bitrate", bitrate, &VIDEO_BITRATE_RANGE_KBPS)?;
                }
                Ok(())
            }
            Self::Image(i) => check_range("quality", i.quality, &QUALITY_RANGE),
            Self::Audio(a) => check_range("bitrate", a.bitrate_kbps, &AUDIO_BITRATE_RANGE_KBPS),
        }
    }
}

fn check_range(field: &str, value: u32, range: &RangeInclusive<u32>) -> Result<(), AppError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(AppError::InvalidSettings(format!(
            "{} must be within {}..={} (got {})",
            field,
            range.start(),
            range.end(),
            value
        )))
    }
}

/// Trim window for a preview clip. Seconds relative to the source start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipWindow {
    pub start_secs: f64,
    pub duration_secs: f64,
}

impl ClipWindow {
    pub fn new(start_secs: f64, duration_secs: f64) -> Self {
        Self {
            start_secs: start_secs.max(0.0),
            duration_secs: duration_secs.max(0.0),
        }
    }

    /// Window of `clip_secs` placed at `position` (0..1) of the source, kept
    /// inside the source. None when the source has no known duration.
    pub fn from_scrub(position: f64, source_duration_secs: f64, clip_secs: f64) -> Option<Self> {
        if !(source_duration_secs > 0.0) || !(clip_secs > 0.0) {
            return None;
        }
        let position = if position.is_finite() {
            position.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let clip = clip_secs.min(source_duration_secs);
        let start = position * (source_duration_secs - clip);
        Some(Self::new(start, clip))
    }
}
