//! Media inspection by parsing the tool's input report.
//!
//! `ffmpeg -i <path>` with no output prints the container, duration and one
//! line per stream, then exits non-zero. The text is authoritative; the exit
//! code is ignored.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::path_to_string;
use super::progress::parse_duration_secs;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub kind: MediaKind,
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl ProbeResult {
    fn unreadable() -> Self {
        Self {
            kind: MediaKind::Unknown,
            supported: false,
            container: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub bitrate_kbps: u64,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<String>,
    pub has_alpha: bool,
}

pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeResult, AppError>;

    fn info(&self, path: &Path) -> Result<MediaInfo, AppError>;

    fn inspect(&self, path: &Path) -> Result<(ProbeResult, MediaInfo), AppError> {
        Ok((self.probe(path)?, self.info(path)?))
    }
}

static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Input #\d+, (.+?), from '").expect("invalid input regex"));
static BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate: (\d+) kb/s").expect("invalid bitrate regex"));
static BRAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"major_brand\s*:\s*(\w+)").expect("invalid brand regex"));
static STREAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Stream #\d+:\d+\S*: (Video|Audio|Subtitle|Data|Attachment): (.*)")
        .expect("invalid stream regex")
});
static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r", (\d+)x(\d+)").expect("invalid resolution regex"));
static PIX_FMT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^,]+, ([a-z0-9][a-z0-9_]*)").expect("invalid pix_fmt regex"));

const IMAGE_CONTAINERS: &[&str] = &["image2", "webp", "gif", "apng"];
const IMAGE_BRANDS: &[&str] = &["avif", "avis", "heic", "heix", "mif1"];

/// Pixel formats that may carry transparency: yuva*, gbrap*, ya*, rgba/bgra/argb/abgr,
/// and pal8, whose palette entries have their own alpha.
pub fn pixel_format_has_alpha(pix_fmt: &str) -> bool {
    let base = pix_fmt.split('(').next().unwrap_or(pix_fmt);
    base == "pal8"
        || base.starts_with("yuva")
        || base.starts_with("gbrap")
        || base.starts_with("ya")
        || ["rgba", "bgra", "argb", "abgr"]
            .iter()
            .any(|p| base.starts_with(p))
}

fn is_image_container(container: &str, brand: Option<&str>) -> bool {
    let by_name = container
        .split(',')
        .map(str::trim)
        .any(|name| IMAGE_CONTAINERS.contains(&name) || name.ends_with("_pipe"));
    by_name || brand.is_some_and(|b| IMAGE_BRANDS.contains(&b))
}

struct VideoStream<'a> {
    desc: &'a str,
    cover: bool,
}

/// Parse the input report into a classification and stream facts.
pub fn parse_inspect_output(text: &str) -> (ProbeResult, MediaInfo) {
    let Some(container) = INPUT_RE.captures(text).map(|c| c[1].to_string()) else {
        return (ProbeResult::unreadable(), MediaInfo::default());
    };
    let brand = BRAND_RE.captures(text).map(|c| c[1].to_string());

    let mut video_streams = Vec::new();
    let mut has_audio = false;
    for caps in STREAM_RE.captures_iter(text) {
        let desc = caps.get(2).map_or("", |m| m.as_str());
        match &caps[1] {
            "Video" => video_streams.push(VideoStream {
                desc,
                cover: desc.contains("(attached pic)"),
            }),
            "Audio" => has_audio = true,
            _ => {}
        }
    }

    let primary = video_streams.iter().find(|s| !s.cover);
    let picture = primary.or_else(|| video_streams.first());

    let kind = if is_image_container(&container, brand.as_deref()) && picture.is_some() {
        MediaKind::Image
    } else if primary.is_some() {
        MediaKind::Video
    } else if has_audio {
        MediaKind::Audio
    } else {
        MediaKind::Unknown
    };

    let duration_secs = parse_duration_secs(text).unwrap_or(0.0);
    let bitrate_kbps = BITRATE_RE
        .captures(text)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);

    // Cover art dimensions are not the media's dimensions.
    let dims_stream = if kind == MediaKind::Image { picture } else { primary };
    let (width, height) = dims_stream
        .and_then(|s| RESOLUTION_RE.captures(s.desc))
        .map(|c| (c[1].parse().unwrap_or(0), c[2].parse().unwrap_or(0)))
        .unwrap_or((0, 0));
    let pixel_format = dims_stream
        .and_then(|s| PIX_FMT_RE.captures(s.desc))
        .map(|c| c[1].to_string());
    let has_alpha = pixel_format.as_deref().is_some_and(pixel_format_has_alpha);

    (
        ProbeResult {
            kind,
            supported: true,
            container: Some(container),
        },
        MediaInfo {
            duration_secs,
            bitrate_kbps,
            width,
            height,
            pixel_format,
            has_alpha,
        },
    )
}

/// Probe backed by the FFmpeg executable itself.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffmpeg: PathBuf,
}

impl FfmpegProbe {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// A tool that cannot start is reported before anything about the input.
    fn run(&self, path: &Path) -> Result<String, AppError> {
        log::debug!(
            target: "mediapress::ffmpeg::probe",
            "inspect: path={}",
            path.display()
        );
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostdin", "-i"])
            .arg(path_to_string(path));
        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        let output = cmd.output().map_err(|e| {
            AppError::ToolUnavailable(format!(
                "Failed to run {}: {}",
                self.ffmpeg.display(),
                e
            ))
        })?;
        if !path.exists() {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

impl MediaProbe for FfmpegProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult, AppError> {
        self.inspect(path).map(|(result, _)| result)
    }

    fn info(&self, path: &Path) -> Result<MediaInfo, AppError> {
        self.inspect(path).map(|(_, info)| info)
    }

    fn inspect(&self, path: &Path) -> Result<(ProbeResult, MediaInfo), AppError> {
        let text = self.run(path)?;
        let (result, info) = parse_inspect_output(&text);
        log::debug!(
            target: "mediapress::ffmpeg::probe",
            "inspect result: kind={:?}, supported={}, container={:?}, duration={:.2}s, {}x{}, pix_fmt={:?}",
            result.kind,
            result.supported,
            result.container,
            info.duration_secs,
            info.width,
            info.height,
            info.pixel_format
        );
        Ok((result, info))
    }
}
