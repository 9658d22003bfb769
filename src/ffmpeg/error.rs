//! Map FFmpeg failures to short user-facing summaries.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal handled by ffmpeg). 128 + N means the process
//! was killed by signal N. -1 is used for spawn failure.
//! The raw diagnostic text is always kept as detail.

use serde::Serialize;

/// Failure payload for the host application. It shows summary; detail is expandable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

const ELLIPSIS: &str = "…";

/// Known diagnostic phrases that explain a failure better than the exit code.
const KNOWN_PHRASES: &[(&str, &str)] = &[
    ("No such file or directory", "Input file could not be opened."),
    ("Invalid data found when processing input", "Input is not a readable media file."),
    ("Unknown encoder", "Requested encoder is not available in this FFmpeg build."),
    ("Permission denied", "Output location is not writable."),
    ("No space left on device", "Disk is full."),
];

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = phrase_summary(stderr)
        .or_else(|| exit_code.and_then(known_exit_code_summary))
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("FFmpeg failed (exit code {}).", code),
            None => first_line_truncated(stderr, 120),
        });
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

fn phrase_summary(stderr: &str) -> Option<String> {
    KNOWN_PHRASES
        .iter()
        .find(|(phrase, _)| stderr.contains(phrase))
        .map(|(_, summary)| summary.to_string())
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        129..=192 => Some(format!("FFmpeg was killed by signal {}.", code - 128)),
        _ => None,
    }
}

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}
