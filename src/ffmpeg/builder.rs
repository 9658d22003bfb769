use std::path::Path;

use crate::codec::{EncoderRow, OutputFormat, encoder_row};
use crate::error::AppError;
use crate::settings::{
    AudioSettings, ClipWindow, CompressionSettings, ImageFormat, ImageSettings, ScaleFactor,
    VideoFormat, VideoSettings,
};

use super::capabilities::CapabilitySet;
use super::path_to_string;
use super::probe::MediaInfo;

const GLOBAL_ARGS: &[&str] = &["-hide_banner", "-nostdin", "-y", "-threads", "0"];
const VIDEO_AUDIO_BITRATE: &str = "128k";
const SPLIT_ALPHA_PIX_FMT: &str = "yuva444p";

/// How the alpha plane of a transparent source reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlphaPlan {
    Opaque,
    Native(&'static str),
    Split,
}

fn plan_alpha(
    format: OutputFormat,
    encoder: &str,
    capabilities: &CapabilitySet,
    source_has_alpha: bool,
) -> AlphaPlan {
    if !source_has_alpha {
        return AlphaPlan::Opaque;
    }
    let profile = format.profile();
    let Some(pix_fmt) = profile.alpha_pix_fmt else {
        log::debug!(
            target: "mediapress::ffmpeg::builder",
            "{} has no transparency; flattening alpha",
            profile.label
        );
        return AlphaPlan::Opaque;
    };
    if capabilities.supports_pix_fmt(encoder, pix_fmt) {
        AlphaPlan::Native(pix_fmt)
    } else if profile.split_alpha {
        AlphaPlan::Split
    } else {
        log::warn!(
            target: "mediapress::ffmpeg::builder",
            "{} does not accept {}; alpha will be dropped",
            encoder,
            pix_fmt
        );
        AlphaPlan::Opaque
    }
}

/// Output dimensions for a scale factor: even, at least 2.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let even = |v: u32| -> u32 {
        let scaled = (v as f64 * scale / 2.0).trunc() as u32 * 2;
        scaled.max(2)
    };
    (even(width), even(height))
}

/// Explicit even dimensions when the source size is known, otherwise the
/// equivalent expression for the scale filter to evaluate.
fn scale_filter(scale: ScaleFactor, source_dims: Option<(u32, u32)>) -> Option<String> {
    scale.is_downscale().then(|| {
        let s = scale.value();
        match source_dims {
            Some((w, h)) => {
                let (w, h) = scaled_dimensions(w, h, s);
                format!("scale={w}:{h}")
            }
            None => format!("scale=trunc(iw*{s}/2)*2:trunc(ih*{s}/2)*2"),
        }
    })
}

fn secs_arg(secs: f64) -> String {
    format!("{:.3}", secs)
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

fn quality_args(args: &mut Vec<String>, row: Option<&EncoderRow>, quality: u32) {
    if let Some(scale) = row.and_then(|r| r.quality) {
        args.push(scale.flag.to_string());
        args.push(scale.map(quality).to_string());
    }
}

/// Build the argv for one transcode. Preview and export builds differ only in
/// the optional clip window (`-ss` before the input, `-t` after it).
pub fn build_command(
    source: &Path,
    settings: &CompressionSettings,
    clip: Option<&ClipWindow>,
    output: &Path,
    capabilities: &CapabilitySet,
    source_info: Option<&MediaInfo>,
) -> Result<Vec<String>, AppError> {
    settings.validate()?;
    let has_alpha = source_info.is_some_and(|i| i.has_alpha);
    let dims = source_info
        .filter(|i| i.width > 0 && i.height > 0)
        .map(|i| (i.width, i.height));

    let mut args: Vec<String> = Vec::with_capacity(32);
    push(&mut args, GLOBAL_ARGS);
    if let Some(clip) = clip {
        args.push("-ss".to_string());
        args.push(secs_arg(clip.start_secs));
    }
    args.push("-i".to_string());
    args.push(path_to_string(source));
    if let Some(clip) = clip {
        args.push("-t".to_string());
        args.push(secs_arg(clip.duration_secs));
    }

    let format = match settings {
        CompressionSettings::Video(v) => OutputFormat::Video(v.format),
        CompressionSettings::Image(i) => OutputFormat::Image(i.format),
        CompressionSettings::Audio(a) => OutputFormat::Audio(a.format),
    };

    match format.select_encoder(capabilities) {
        Some(encoder) => {
            log::debug!(
                target: "mediapress::ffmpeg::builder",
                "Building FFmpeg command: format={}, encoder={}, clip={:?}, input={} -> output={}",
                format.profile().label,
                encoder,
                clip,
                source.display(),
                output.display()
            );
            match settings {
                CompressionSettings::Video(v) => {
                    let alpha = plan_alpha(format, encoder, capabilities, has_alpha);
                    video_args(&mut args, v, encoder, alpha, dims);
                }
                CompressionSettings::Image(i) => {
                    let alpha = plan_alpha(format, encoder, capabilities, has_alpha);
                    image_args(&mut args, i, encoder, alpha, dims);
                }
                CompressionSettings::Audio(a) => audio_args(&mut args, a, encoder),
            }
        }
        None => {
            log::warn!(
                target: "mediapress::ffmpeg::builder",
                "No encoder for {} in this FFmpeg build; using container defaults",
                format.profile().label
            );
            fallback_args(&mut args, settings, dims);
        }
    }

    args.push(path_to_string(output));
    Ok(args)
}

fn video_args(
    args: &mut Vec<String>,
    v: &VideoSettings,
    encoder: &'static str,
    alpha: AlphaPlan,
    dims: Option<(u32, u32)>,
) {
    let row = encoder_row(encoder);
    if let Some(filter) = scale_filter(v.scale, dims) {
        args.push("-vf".to_string());
        args.push(filter);
    }
    push(args, &["-c:v", encoder]);

    let is_vp9 = v.format == VideoFormat::WebmVp9;
    match v.bitrate_kbps {
        Some(kbps) => {
            let rate = format!("{}k", kbps);
            push(args, &["-b:v", &rate, "-maxrate", &rate]);
            push(args, &["-bufsize", &format!("{}k", kbps * 2)]);
        }
        None => {
            quality_args(args, row, v.quality);
            if is_vp9 {
                push(args, &["-b:v", "0"]);
            }
        }
    }
    if is_vp9 {
        push(args, &["-row-mt", "1"]);
    }

    match alpha {
        AlphaPlan::Native(pix_fmt) => push(args, &["-pix_fmt", pix_fmt]),
        _ => {
            if let Some(pix_fmt) = row.and_then(|r| r.default_pix_fmt) {
                push(args, &["-pix_fmt", pix_fmt]);
            }
        }
    }
    if v.format == VideoFormat::Mp4Hevc {
        push(args, &["-tag:v", "hvc1"]);
    }

    if v.remove_audio {
        args.push("-an".to_string());
    } else if is_vp9 {
        push(args, &["-c:a", "libopus", "-b:a", VIDEO_AUDIO_BITRATE]);
    } else {
        push(args, &["-c:a", "aac", "-b:a", VIDEO_AUDIO_BITRATE]);
    }
    if v.format.extension() == "mp4" {
        push(args, &["-movflags", "+faststart"]);
    }
}

fn image_args(
    args: &mut Vec<String>,
    i: &ImageSettings,
    encoder: &'static str,
    alpha: AlphaPlan,
    dims: Option<(u32, u32)>,
) {
    let row = encoder_row(encoder);
    let scale = scale_filter(i.scale, dims);

    match alpha {
        AlphaPlan::Split => {
            let graph = format!(
                "[0:v]{}format={},split[color][alpha];[alpha]alphaextract[alpha]",
                scale.map(|s| format!("{},", s)).unwrap_or_default(),
                SPLIT_ALPHA_PIX_FMT
            );
            push(args, &["-filter_complex", &graph, "-map", "[color]", "-map", "[alpha]"]);
        }
        _ => {
            if let Some(filter) = scale {
                args.push("-vf".to_string());
                args.push(filter);
            }
        }
    }

    push(args, &["-frames:v", "1", "-c:v", encoder]);
    quality_args(args, row, i.quality);

    match alpha {
        AlphaPlan::Native(pix_fmt) => push(args, &["-pix_fmt", pix_fmt]),
        AlphaPlan::Split => {}
        AlphaPlan::Opaque => {
            if let Some(pix_fmt) = row.and_then(|r| r.default_pix_fmt) {
                push(args, &["-pix_fmt", pix_fmt]);
            }
        }
    }
    if i.format == ImageFormat::Avif && encoder == "libaom-av1" {
        push(args, &["-still-picture", "1"]);
    }
}

fn audio_args(args: &mut Vec<String>, a: &AudioSettings, encoder: &'static str) {
    let bitrate = format!("{}k", a.bitrate_kbps);
    push(args, &["-vn", "-c:a", encoder, "-b:a", &bitrate]);
}

/// Container-default conversion for formats this FFmpeg build has no encoder for.
fn fallback_args(
    args: &mut Vec<String>,
    settings: &CompressionSettings,
    dims: Option<(u32, u32)>,
) {
    let scale = match settings {
        CompressionSettings::Video(v) => v.scale,
        CompressionSettings::Image(i) => i.scale,
        CompressionSettings::Audio(_) => ScaleFactor::Full,
    };
    if let Some(filter) = scale_filter(scale, dims) {
        args.push("-vf".to_string());
        args.push(filter);
    }
    if matches!(settings, CompressionSettings::Image(_)) {
        push(args, &["-frames:v", "1"]);
    }
}

fn display_token(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || "[];'\"".contains(c)) {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

/// Render args one option per line, keeping each flag with its value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let takes_value = arg.starts_with('-') && iter.peek().is_some_and(|next| !next.starts_with('-'));
        match takes_value.then(|| iter.next()).flatten() {
            Some(value) => lines.push(format!("  {} {}", arg, display_token(value))),
            None => lines.push(format!("  {}", display_token(arg))),
        }
    }
    lines.join("\n")
}
