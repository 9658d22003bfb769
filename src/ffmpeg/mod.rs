mod builder;
pub mod capabilities;
pub mod discovery;
mod error;
pub mod probe;
mod progress;
pub mod runner;
pub mod temp;

pub use builder::{build_command, format_args_for_display_multiline, scaled_dimensions};
pub use capabilities::{CapabilitySet, query_capabilities};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use probe::{FfmpegProbe, MediaInfo, MediaKind, MediaProbe, ProbeResult};
pub use progress::{parse_duration_secs, parse_elapsed_secs, parse_ffmpeg_progress};
pub use runner::{
    CancelHandle, ExitOutcome, FfmpegRunner, ProcessRequest, ProcessRunner, ProgressSink,
    TaskControl, TaskHandle,
};
pub use temp::{TempFileManager, cleanup_old_temp_files, move_file, remove_if_exists};

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
