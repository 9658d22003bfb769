//! Startup strategy selection: which runner, probe and capability set the
//! supervisor gets. Chosen once; nothing downstream re-queries the tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AppError;
use crate::ffmpeg::discovery::get_ffmpeg_path;
use crate::ffmpeg::{
    CapabilitySet, FfmpegProbe, FfmpegRunner, MediaProbe, ProcessRunner, query_capabilities,
};

#[derive(Clone)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub runner: Arc<dyn ProcessRunner>,
    pub probe: Arc<dyn MediaProbe>,
    pub capabilities: Arc<CapabilitySet>,
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain")
            .field("ffmpeg", &self.ffmpeg)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Toolchain {
    /// Locate FFmpeg and query its capabilities. Blocking; call before starting work.
    pub fn discover() -> Result<Self, AppError> {
        let ffmpeg = get_ffmpeg_path()?;
        Self::for_binary(&ffmpeg)
    }

    pub fn for_binary(ffmpeg: &Path) -> Result<Self, AppError> {
        let capabilities = query_capabilities(ffmpeg)?;
        log::info!(
            target: "mediapress::toolchain",
            "Using FFmpeg at {} ({} encoders)",
            ffmpeg.display(),
            capabilities.encoders().len()
        );
        Ok(Self {
            ffmpeg: ffmpeg.to_path_buf(),
            runner: Arc::new(FfmpegRunner),
            probe: Arc::new(FfmpegProbe::new(ffmpeg)),
            capabilities: Arc::new(capabilities),
        })
    }

    /// Assemble from explicit parts, for alternative strategies and test doubles.
    pub fn from_parts(
        ffmpeg: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        probe: Arc<dyn MediaProbe>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            runner,
            probe,
            capabilities: Arc::new(capabilities),
        }
    }
}
