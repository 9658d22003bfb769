//! Sequential multi-file export on a dedicated supervisor.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::config::SupervisorConfig;
use crate::error::AppError;
use crate::ffmpeg::ProbeResult;
use crate::settings::CompressionSettings;
use crate::supervisor::{
    FailureReport, SupervisorEvent, SupervisorEvents, SupervisorHandle, TaskSupervisor,
    WorkStream,
};
use crate::toolchain::Toolchain;

/// Chooses settings for one batch item from its probe result.
pub type SettingsResolver =
    dyn Fn(&Path, &ProbeResult) -> Result<CompressionSettings, AppError> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// Overall progress in [0,1]: `(completed + current fraction) / total`.
    pub progress: f64,
    /// `"i/n name"` for the file in flight.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub input: PathBuf,
    pub error: FailureReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub destination: PathBuf,
    pub succeeded: Vec<BatchOutput>,
    pub failed: Vec<BatchFailure>,
    /// Files never attempted because the batch was cancelled or the tool is unusable.
    pub skipped: Vec<PathBuf>,
    pub aborted: bool,
}

impl BatchReport {
    fn new(destination: &Path) -> Self {
        Self {
            destination: destination.to_path_buf(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            aborted: false,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }
}

/// `<stem>_compressed.<ext>` in `dir`, with `_2`, `_3`... until nothing is in the way.
pub fn unique_output_path(
    dir: &Path,
    input: &Path,
    extension: &str,
    taken: &HashSet<PathBuf>,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let free = |p: &PathBuf| !p.exists() && !taken.contains(p) && p.as_path() != input;
    let first = dir.join(format!("{}_compressed.{}", stem, extension));
    if free(&first) {
        return first;
    }
    (2u32..)
        .map(|n| dir.join(format!("{}_compressed_{}.{}", stem, n, extension)))
        .find(|p| free(p))
        .unwrap_or(first)
}

fn item_label(index: usize, total: usize, input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{} {}", index + 1, total, name)
}

enum ItemResult {
    Done(PathBuf),
    Failed { error: FailureReport, fatal: bool },
    Cancelled,
}

impl From<AppError> for ItemResult {
    fn from(err: AppError) -> Self {
        if err.is_silent() {
            return ItemResult::Cancelled;
        }
        ItemResult::Failed {
            error: FailureReport::from_error(&err),
            fatal: err.is_fatal(),
        }
    }
}

/// Stops a running batch: the current export is cancelled and no further file starts.
#[derive(Debug, Clone)]
pub struct BatchCanceller {
    flag: Arc<AtomicBool>,
    supervisor: SupervisorHandle,
}

impl BatchCanceller {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.supervisor.cancel_export();
    }
}

pub struct BatchCoordinator {
    supervisor: SupervisorHandle,
    events: SupervisorEvents,
    cancelled: Arc<AtomicBool>,
}

impl BatchCoordinator {
    /// Coordinator with its own supervisor, so batch work never touches another session's lanes.
    pub fn new(config: SupervisorConfig, toolchain: Toolchain) -> Self {
        let (supervisor, events) = TaskSupervisor::spawn(config, toolchain);
        Self::with_supervisor(supervisor, events)
    }

    pub fn with_supervisor(supervisor: SupervisorHandle, events: SupervisorEvents) -> Self {
        Self {
            supervisor,
            events,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn canceller(&self) -> BatchCanceller {
        BatchCanceller {
            flag: Arc::clone(&self.cancelled),
            supervisor: self.supervisor.clone(),
        }
    }

    /// Export every file in order. Per-file failures are recorded and the batch
    /// moves on; an unusable tool or a cancel stops it.
    pub async fn run(
        &mut self,
        files: &[PathBuf],
        resolver: &SettingsResolver,
        destination_dir: &Path,
        progress: &(dyn Fn(BatchProgress) + Send + Sync),
    ) -> Result<BatchReport, AppError> {
        std::fs::create_dir_all(destination_dir)?;
        let total = files.len();
        let mut report = BatchReport::new(destination_dir);
        let mut taken: HashSet<PathBuf> = HashSet::new();
        log::info!(
            target: "mediapress::batch",
            "Batch of {} file(s) -> {}",
            total,
            destination_dir.display()
        );

        for (index, input) in files.iter().enumerate() {
            if report.aborted || self.cancelled.load(Ordering::SeqCst) {
                report.aborted = true;
                report.skipped.push(input.clone());
                continue;
            }
            let label = item_label(index, total, input);
            progress(BatchProgress {
                progress: index as f64 / total as f64,
                label: label.clone(),
            });

            let result = self
                .process_one(input, resolver, destination_dir, &mut taken, |fraction| {
                    progress(BatchProgress {
                        progress: (index as f64 + fraction.clamp(0.0, 1.0)) / total as f64,
                        label: label.clone(),
                    })
                })
                .await;

            match result {
                ItemResult::Done(output) => {
                    log::info!(
                        target: "mediapress::batch",
                        "{} -> {}",
                        label,
                        output.display()
                    );
                    report.succeeded.push(BatchOutput {
                        input: input.clone(),
                        output,
                    });
                }
                ItemResult::Failed { error, fatal } => {
                    log::warn!(
                        target: "mediapress::batch",
                        "{} failed: {}",
                        label,
                        error.summary
                    );
                    report.aborted = fatal;
                    report.failed.push(BatchFailure {
                        input: input.clone(),
                        error,
                    });
                }
                ItemResult::Cancelled => {
                    log::info!(target: "mediapress::batch", "{} cancelled", label);
                    report.aborted = true;
                    report.skipped.push(input.clone());
                }
            }
        }

        if total > 0 && !report.aborted {
            progress(BatchProgress {
                progress: 1.0,
                label: format!("{}/{} done", total, total),
            });
        }
        log::info!(
            target: "mediapress::batch",
            "Batch finished: {} ok, {} failed, {} skipped",
            report.success_count(),
            report.failure_count(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn process_one(
        &mut self,
        input: &Path,
        resolver: &SettingsResolver,
        destination_dir: &Path,
        taken: &mut HashSet<PathBuf>,
        on_fraction: impl Fn(f64),
    ) -> ItemResult {
        let source = match self.supervisor.load_source(input).await {
            Ok(source) => source,
            Err(err) => return err.into(),
        };
        let settings = match resolver(input, &source.probe) {
            Ok(settings) => settings,
            Err(err) => return err.into(),
        };
        let output = unique_output_path(destination_dir, input, settings.output_extension(), taken);
        taken.insert(output.clone());

        let generation = match self.supervisor.request_export(settings, &output).await {
            Ok(generation) => generation,
            Err(err) => return err.into(),
        };
        // A cancel that raced the request above found nothing to stop.
        if self.cancelled.load(Ordering::SeqCst) {
            self.supervisor.cancel_export();
        }

        while let Some(event) = self.events.recv().await {
            if event.stream() != WorkStream::Export || event.generation() != generation {
                continue;
            }
            match event {
                SupervisorEvent::Progress { progress, .. } => on_fraction(progress),
                SupervisorEvent::Completed { output, .. } => return ItemResult::Done(output),
                SupervisorEvent::Failed { error, .. } => {
                    return ItemResult::Failed {
                        error,
                        fatal: false,
                    };
                }
                SupervisorEvent::Cancelled { .. } => return ItemResult::Cancelled,
                SupervisorEvent::Started { .. } => {}
            }
        }
        ItemResult::Cancelled
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
