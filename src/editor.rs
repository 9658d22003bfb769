//! The editor-facing surface: current settings, scrub position and the calls a
//! UI makes as the user drags sliders.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::{BatchCanceller, BatchCoordinator, BatchProgress, BatchReport};
use crate::config::SupervisorConfig;
use crate::error::AppError;
use crate::ffmpeg::{MediaKind, ProbeResult, format_args_for_display_multiline};
use crate::settings::{ClipWindow, CompressionSettings};
use crate::supervisor::{SourceInfo, SupervisorEvents, SupervisorHandle, TaskSupervisor};
use crate::toolchain::Toolchain;

pub type BatchProgressSink = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Preview window for the source at `scrub`. Images render whole.
pub fn preview_clip(source: &SourceInfo, scrub: f64, clip_secs: f64) -> Option<ClipWindow> {
    if source.probe.kind == MediaKind::Image {
        return None;
    }
    ClipWindow::from_scrub(scrub, source.info.duration_secs, clip_secs)
}

/// Settings for a batch item: the editor's snapshot when it fits the file, else that kind's defaults.
pub fn resolve_batch_settings(
    current: Option<&CompressionSettings>,
    input: &Path,
    probe: &ProbeResult,
) -> Result<CompressionSettings, AppError> {
    if let Some(settings) = current.filter(|s| s.kind() == probe.kind) {
        return Ok(settings.clone());
    }
    CompressionSettings::default_for(probe.kind).ok_or_else(|| {
        AppError::UnsupportedInput(format!("{} has no compressible stream", input.display()))
    })
}

pub struct EditorSession {
    config: SupervisorConfig,
    toolchain: Toolchain,
    supervisor: SupervisorHandle,
    source: Option<SourceInfo>,
    settings: Option<CompressionSettings>,
    scrub: f64,
}

impl EditorSession {
    pub fn new(config: SupervisorConfig, toolchain: Toolchain) -> (Self, SupervisorEvents) {
        let (supervisor, events) = TaskSupervisor::spawn(config.clone(), toolchain.clone());
        (
            Self {
                config,
                toolchain,
                supervisor,
                source: None,
                settings: None,
                scrub: 0.0,
            },
            events,
        )
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    pub fn source(&self) -> Option<&SourceInfo> {
        self.source.as_ref()
    }

    pub fn settings(&self) -> Option<&CompressionSettings> {
        self.settings.as_ref()
    }

    pub fn scrub(&self) -> f64 {
        self.scrub
    }

    fn clip(&self) -> Option<ClipWindow> {
        self.source
            .as_ref()
            .and_then(|s| preview_clip(s, self.scrub, self.config.preview_clip_secs))
    }

    /// Open a file: default settings for its kind, scrub at the start, first preview queued.
    pub async fn load(&mut self, path: impl Into<PathBuf>) -> Result<SourceInfo, AppError> {
        let source = self.supervisor.load_source(path).await?;
        self.settings = CompressionSettings::default_for(source.probe.kind);
        self.scrub = 0.0;
        self.source = Some(source.clone());
        if let Some(settings) = self.settings.clone() {
            self.supervisor.request_preview(settings, self.clip()).await?;
        }
        Ok(source)
    }

    /// Adopt a new settings snapshot and re-render the preview. The snapshot is
    /// kept only if the supervisor accepts it.
    pub async fn on_settings_changed(
        &mut self,
        settings: CompressionSettings,
    ) -> Result<u64, AppError> {
        let generation = self
            .supervisor
            .request_preview(settings.clone(), self.clip())
            .await?;
        self.settings = Some(settings);
        Ok(generation)
    }

    pub async fn on_scrub(&mut self, position: f64) -> Result<u64, AppError> {
        let settings = self.current_settings()?;
        self.scrub = if position.is_finite() {
            position.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.supervisor.request_preview(settings, self.clip()).await
    }

    pub async fn on_save(&self, output: impl Into<PathBuf>) -> Result<u64, AppError> {
        let settings = self.current_settings()?;
        self.supervisor.request_export(settings, output).await
    }

    /// Export `files` into `destination_dir` on a separate supervisor. The
    /// returned future owns everything it needs; the canceller stops it.
    pub fn on_save_batch(
        &self,
        files: Vec<PathBuf>,
        destination_dir: PathBuf,
        progress: BatchProgressSink,
    ) -> (
        BatchCanceller,
        impl Future<Output = Result<BatchReport, AppError>> + Send + 'static,
    ) {
        let mut coordinator = BatchCoordinator::new(self.config.clone(), self.toolchain.clone());
        let canceller = coordinator.canceller();
        let current = self.settings.clone();
        let job = async move {
            let resolver = move |input: &Path, probe: &ProbeResult| {
                resolve_batch_settings(current.as_ref(), input, probe)
            };
            let report = coordinator
                .run(&files, &resolver, &destination_dir, &*progress)
                .await;
            coordinator.shutdown().await;
            report
        };
        (canceller, job)
    }

    /// Display form of the export command for the current source and settings.
    pub async fn command_preview(&self, output: Option<&Path>) -> Result<String, AppError> {
        let settings = self.current_settings()?;
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(format!("output.{}", settings.output_extension())),
        };
        let args = self.supervisor.command_preview(settings, None, output).await?;
        Ok(format!("ffmpeg\n{}", format_args_for_display_multiline(&args)))
    }

    pub fn cancel_preview(&self) {
        self.supervisor.cancel_preview();
    }

    pub fn cancel_export(&self) {
        self.supervisor.cancel_export();
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    fn current_settings(&self) -> Result<CompressionSettings, AppError> {
        self.settings
            .clone()
            .ok_or_else(|| AppError::UnsupportedInput("No source loaded".to_string()))
    }
}
