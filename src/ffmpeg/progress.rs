use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):(\d+(?:\.\d+)?)").expect("invalid duration regex")
});
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("invalid time regex")
});

fn hms_to_secs(hours: &str, minutes: &str, seconds: &str) -> f64 {
    let hours: f64 = hours.parse().unwrap_or(0.0);
    let minutes: f64 = minutes.parse().unwrap_or(0.0);
    let seconds: f64 = seconds.parse().unwrap_or(0.0);
    hours * 3600.0 + minutes * 60.0 + seconds
}

/// Elapsed output time from a `time=HH:MM:SS.ss` status chunk.
pub fn parse_elapsed_secs(chunk: &str) -> Option<f64> {
    TIME_RE
        .captures_iter(chunk)
        .last()
        .map(|caps| hms_to_secs(&caps[1], &caps[2], &caps[3]))
}

/// Total duration from the `Duration: HH:MM:SS.ss` input header.
pub fn parse_duration_secs(chunk: &str) -> Option<f64> {
    DURATION_RE
        .captures(chunk)
        .map(|caps| hms_to_secs(&caps[1], &caps[2], &caps[3]))
}

/// Parse one diagnostic chunk. Returns (progress 0.0-1.0 or None, duration in seconds or None).
pub fn parse_ffmpeg_progress(
    chunk: &str,
    current_duration: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    if current_duration.is_none()
        && let Some(duration) = parse_duration_secs(chunk)
    {
        return (None, Some(duration));
    }

    if let Some(elapsed) = parse_elapsed_secs(chunk)
        && let Some(dur) = current_duration
        && dur > 0.0
    {
        let progress = (elapsed / dur).clamp(0.0, 1.0);
        return (Some(progress), Some(dur));
    }

    (None, current_duration)
}
