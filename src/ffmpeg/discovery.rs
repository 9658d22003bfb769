use std::path::PathBuf;
use std::process::Command;

use parking_lot::Mutex;

use crate::error::AppError;

pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

const INSTALL_HINT: &str = "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html\nor point FFMPEG_PATH at an ffmpeg executable.";

fn find_in_path() -> Option<PathBuf> {
    let lookup = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };
    let output = Command::new(lookup).arg("ffmpeg").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: Mutex<Option<PathBuf>> = Mutex::new(None);

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    if let Ok(env_path) = std::env::var(FFMPEG_PATH_ENV) {
        let p = PathBuf::from(&env_path);
        if p.is_file() {
            log::debug!(
                target: "mediapress::ffmpeg::discovery",
                "FFmpeg path from {} env: {}",
                FFMPEG_PATH_ENV,
                p.display()
            );
            return Ok(p);
        }
        log::warn!(
            target: "mediapress::ffmpeg::discovery",
            "{} points at a missing file, ignoring: {}",
            FFMPEG_PATH_ENV,
            env_path
        );
    }

    for path in common_paths() {
        if path.is_file() {
            log::debug!(
                target: "mediapress::ffmpeg::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    if let Some(p) = find_in_path().filter(|p| p.is_file()) {
        log::debug!(
            target: "mediapress::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "mediapress::ffmpeg::discovery",
        "FFmpeg not found in {}, common locations or PATH",
        FFMPEG_PATH_ENV
    );
    Err(AppError::ToolUnavailable(INSTALL_HINT.to_string()))
}

/// FFmpeg path, resolved once and cached for the process lifetime.
/// `FFMPEG_PATH` takes precedence, then common install paths, then PATH.
pub fn get_ffmpeg_path() -> Result<PathBuf, AppError> {
    let mut guard = FFMPEG_PATH_CACHE.lock();
    if let Some(path) = guard.as_ref() {
        log::trace!(
            target: "mediapress::ffmpeg::discovery",
            "FFmpeg path (cached): {}",
            path.display()
        );
        return Ok(path.clone());
    }
    let path = resolve_ffmpeg_path()?;
    *guard = Some(path.clone());
    Ok(path)
}

#[cfg(any(test, feature = "integration-test-api"))]
pub fn reset_ffmpeg_path_cache() {
    FFMPEG_PATH_CACHE.lock().take();
}
