//! Encoder metadata and output-format profiles.

use serde::{Deserialize, Serialize};

use crate::ffmpeg::capabilities::CapabilitySet;
use crate::settings::{AudioFormat, ImageFormat, VideoFormat};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncoderInfo {
    pub value: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_flag: Option<String>,
}

/// Inverse-linear mapping from user quality (1..=100) to an encoder parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityScale {
    pub flag: &'static str,
    /// Parameter at quality 100.
    pub best: i32,
    /// Parameter at quality 1.
    pub worst: i32,
    /// Valid parameter range of the encoder.
    pub min: i32,
    pub max: i32,
}

impl QualityScale {
    pub fn map(&self, quality: u32) -> i32 {
        let q = quality.clamp(1, 100) as f64;
        let t = (q - 1.0) / 99.0;
        let value = self.worst as f64 - t * (self.worst - self.best) as f64;
        (value.round() as i32).clamp(self.min, self.max)
    }
}

pub struct EncoderRow {
    pub value: &'static str,
    pub name: &'static str,
    pub quality: Option<QualityScale>,
    /// 4:2:0 pixel format forced when no alpha path applies.
    pub default_pix_fmt: Option<&'static str>,
}

macro_rules! encoder_table {
    (
        $( [$value:expr, $name:expr, $quality:expr, $pix:expr] ),* $(,)?
    ) => {
        const ENCODER_TABLE: &[EncoderRow] = &[
            $( EncoderRow {
                value: $value,
                name: $name,
                quality: $quality,
                default_pix_fmt: $pix,
            } ),*
        ];

        /// Encoder names the builder knows how to drive.
        pub const KNOWN_ENCODER_NAMES: &[&str] = &[ $($value),* ];
    };
}

const fn scale(flag: &'static str, best: i32, worst: i32, min: i32, max: i32) -> Option<QualityScale> {
    Some(QualityScale {
        flag,
        best,
        worst,
        min,
        max,
    })
}

encoder_table!(
    ["libx264", "H.264", scale("-crf", 18, 51, 0, 51), Some("yuv420p")],
    ["h264_videotoolbox", "H.264 (VideoToolbox)", scale("-q:v", 100, 1, 1, 100), Some("yuv420p")],
    ["libx265", "H.265", scale("-crf", 20, 51, 0, 51), Some("yuv420p")],
    ["hevc_videotoolbox", "H.265 (VideoToolbox)", scale("-q:v", 100, 1, 1, 100), Some("yuv420p")],
    ["libvpx-vp9", "VP9", scale("-crf", 15, 63, 0, 63), Some("yuv420p")],
    ["libsvtav1", "AV1 (SVT)", scale("-crf", 0, 63, 0, 63), Some("yuv420p")],
    ["libaom-av1", "AV1 (libaom)", scale("-crf", 0, 63, 0, 63), Some("yuv420p")],
    ["mjpeg", "JPEG", scale("-q:v", 2, 31, 2, 31), Some("yuvj420p")],
    ["png", "PNG", None, None],
    ["libwebp", "WebP", scale("-quality", 100, 1, 0, 100), None],
    ["libmp3lame", "MP3", None, None],
    ["aac", "AAC", None, None],
    ["libopus", "Opus", None, None],
);

pub fn encoder_row(encoder: &str) -> Option<&'static EncoderRow> {
    ENCODER_TABLE.iter().find(|r| r.value == encoder)
}

/// Any output format the builder can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Video(VideoFormat),
    Image(ImageFormat),
    Audio(AudioFormat),
}

/// Per-format encoder preference and alpha handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatProfile {
    pub label: &'static str,
    pub candidates: &'static [&'static str],
    /// Alpha-carrying pixel format; `None` for formats without transparency.
    pub alpha_pix_fmt: Option<&'static str>,
    /// Container can carry color and alpha as two muxed streams.
    pub split_alpha: bool,
}

impl OutputFormat {
    pub fn profile(self) -> FormatProfile {
        match self {
            Self::Video(VideoFormat::Mp4H264) => FormatProfile {
                label: "mp4",
                candidates: &["libx264", "h264_videotoolbox"],
                alpha_pix_fmt: None,
                split_alpha: false,
            },
            Self::Video(VideoFormat::Mp4Hevc) => FormatProfile {
                label: "hevc",
                candidates: &["libx265", "hevc_videotoolbox"],
                alpha_pix_fmt: None,
                split_alpha: false,
            },
            Self::Video(VideoFormat::WebmVp9) => FormatProfile {
                label: "webm",
                candidates: &["libvpx-vp9"],
                alpha_pix_fmt: Some("yuva420p"),
                split_alpha: false,
            },
            Self::Video(VideoFormat::Av1) => FormatProfile {
                label: "av1",
                candidates: &["libsvtav1", "libaom-av1"],
                alpha_pix_fmt: None,
                split_alpha: false,
            },
            Self::Image(ImageFormat::Jpeg) => FormatProfile {
                label: "jpeg",
                candidates: &["mjpeg"],
                alpha_pix_fmt: None,
                split_alpha: false,
            },
            Self::Image(ImageFormat::Png) => FormatProfile {
                label: "png",
                candidates: &["png"],
                alpha_pix_fmt: Some("rgba"),
                split_alpha: false,
            },
            Self::Image(ImageFormat::Webp) => FormatProfile {
                label: "webp",
                candidates: &["libwebp"],
                alpha_pix_fmt: Some("yuva420p"),
                split_alpha: false,
            },
            Self::Image(ImageFormat::Avif) => FormatProfile {
                label: "avif",
                candidates: &["libaom-av1", "libsvtav1"],
                alpha_pix_fmt: Some("yuva420p"),
                split_alpha: true,
            },
            Self::Audio(AudioFormat::Mp3) => FormatProfile {
                label: "mp3",
                candidates: &["libmp3lame"],
                alpha_pix_fmt: None,
                split_alpha: false,
            },
            Self::Audio(AudioFormat::Aac) => FormatProfile {
                label: "aac",
                candidates: &["aac"],
                alpha_pix_fmt: None,
                split_alpha: false,
            },
            Self::Audio(AudioFormat::Opus) => FormatProfile {
                label: "opus",
                candidates: &["libopus"],
                alpha_pix_fmt: None,
                split_alpha: false,
            },
        }
    }

    /// First candidate encoder present in the capability set.
    pub fn select_encoder(self, capabilities: &CapabilitySet) -> Option<&'static str> {
        self.profile()
            .candidates
            .iter()
            .copied()
            .find(|encoder| capabilities.has_encoder(encoder))
    }

    pub fn all() -> Vec<OutputFormat> {
        let video = [
            VideoFormat::Mp4H264,
            VideoFormat::Mp4Hevc,
            VideoFormat::WebmVp9,
            VideoFormat::Av1,
        ]
        .into_iter()
        .map(OutputFormat::Video);
        let image = [
            ImageFormat::Jpeg,
            ImageFormat::Png,
            ImageFormat::Webp,
            ImageFormat::Avif,
        ]
        .into_iter()
        .map(OutputFormat::Image);
        let audio = [AudioFormat::Mp3, AudioFormat::Aac, AudioFormat::Opus]
            .into_iter()
            .map(OutputFormat::Audio);
        video.chain(image).chain(audio).collect()
    }
}

/// One row of the capability report shown to the host application.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormatAvailability {
    pub format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder: Option<EncoderInfo>,
    /// True when the builder will use the container-default fallback.
    pub fallback: bool,
}

pub fn get_encoder_info(encoder: &str) -> Option<EncoderInfo> {
    encoder_row(encoder).map(|row| EncoderInfo {
        value: row.value.to_string(),
        name: row.name.to_string(),
        quality_flag: row.quality.map(|q| q.flag.to_string()),
    })
}

pub fn format_availability(capabilities: &CapabilitySet) -> Vec<FormatAvailability> {
    OutputFormat::all()
        .into_iter()
        .map(|format| {
            let encoder = format.select_encoder(capabilities).and_then(get_encoder_info);
            FormatAvailability {
                format: format.profile().label,
                fallback: encoder.is_none(),
                encoder,
            }
        })
        .collect()
}
