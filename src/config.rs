//! Runtime configuration for the supervisor and sidecar.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEBOUNCE_ENV: &str = "MEDIAPRESS_DEBOUNCE_MS";
pub const PREVIEW_SECS_ENV: &str = "MEDIAPRESS_PREVIEW_SECS";
pub const TEMP_DIR_ENV: &str = "MEDIAPRESS_TEMP_DIR";

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
const DEFAULT_PREVIEW_CLIP_SECS: f64 = 3.0;
const DEFAULT_TEMP_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Quiescence window before a preview request is built and submitted.
    pub debounce: Duration,
    /// Length of the clip a video or audio preview renders.
    pub preview_clip_secs: f64,
    /// Where preview outputs and in-progress exports are written.
    pub temp_dir: PathBuf,
    /// Startup cleanup removes temp files older than this.
    pub temp_max_age: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            preview_clip_secs: DEFAULT_PREVIEW_CLIP_SECS,
            temp_dir: std::env::temp_dir().join("mediapress"),
            temp_max_age: DEFAULT_TEMP_MAX_AGE,
        }
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!(
                target: "mediapress::config",
                "Ignoring invalid {}={:?}",
                key,
                raw
            );
            None
        }
    }
}

impl SupervisorConfig {
    /// Defaults with environment overrides applied. Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_value::<u64>(DEBOUNCE_ENV) {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = env_value::<f64>(PREVIEW_SECS_ENV).filter(|s| *s > 0.0 && s.is_finite()) {
            config.preview_clip_secs = secs;
        }
        if let Some(dir) = std::env::var_os(TEMP_DIR_ENV).filter(|d| !d.is_empty()) {
            config.temp_dir = PathBuf::from(dir);
        }
        log::debug!(
            target: "mediapress::config",
            "debounce={:?}, preview_clip_secs={}, temp_dir={}",
            config.debounce,
            config.preview_clip_secs,
            config.temp_dir.display()
        );
        config
    }

    pub fn with_debounce(self, debounce: Duration) -> Self {
        Self { debounce, ..self }
    }

    pub fn with_temp_dir(self, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            ..self
        }
    }

    pub fn with_preview_clip_secs(self, preview_clip_secs: f64) -> Self {
        Self {
            preview_clip_secs,
            ..self
        }
    }
}
