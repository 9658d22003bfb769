//! Core error type. Implements Display and Serialize for the host application.

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    ToolUnavailable(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    #[error("Cancelled")]
    Cancelled,

    /// Result of a task that was superseded by a newer request.
    #[error("Superseded")]
    Stale,

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("{0}")]
    Busy(String),

    /// Malformed call from the host: unknown method or bad parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failure inside the orchestrator itself (join errors, missing pipes).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn process_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::ProcessFailed {
            code,
            stderr: stderr.into(),
        }
    }

    /// Cancelled and stale results are control flow, not failures.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Stale)
    }

    /// Errors that make any further compression attempt pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ToolUnavailable(_))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::ProcessFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}
