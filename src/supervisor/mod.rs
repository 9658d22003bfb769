//! Preview and export lifecycle.
//!
//! One actor task owns all state: the loaded source, both lanes and the
//! pending (debounced) preview request. Handles talk to it over a command
//! channel; runner callbacks come back over an internal channel. Because every
//! transition happens on the actor, no lock guards supervisor state.
//!
//! Each lane has a generation counter. A request bumps it, which makes every
//! older task stale: stale completions are dropped without an event and their
//! outputs are deleted. Loads carry a ticket the same way, so only the most
//! recent load can replace the source.

mod stream;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub use stream::{OutcomeKind, StreamPhase, StreamSnapshot, WorkStream};
use stream::{ActiveTask, Lane};

use crate::config::SupervisorConfig;
use crate::error::AppError;
use crate::ffmpeg::{
    ExitOutcome, MediaInfo, MediaKind, ProbeResult, ProcessRequest, ProgressSink, TempFileManager,
    build_command, move_file, parse_ffmpeg_error, remove_if_exists,
};
use crate::settings::{ClipWindow, CompressionSettings};
use crate::toolchain::Toolchain;

/// User-facing failure: short summary plus the raw diagnostic text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub summary: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl FailureReport {
    pub fn from_error(err: &AppError) -> Self {
        match err {
            AppError::ProcessFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                Self {
                    summary: payload.summary,
                    detail: payload.detail,
                    code: Some(*code),
                }
            }
            other => {
                let text = other.to_string();
                Self {
                    summary: text.clone(),
                    detail: text,
                    code: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SupervisorEvent {
    Started {
        stream: WorkStream,
        generation: u64,
    },
    Progress {
        stream: WorkStream,
        generation: u64,
        progress: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Completed {
        stream: WorkStream,
        generation: u64,
        output: PathBuf,
    },
    Failed {
        stream: WorkStream,
        generation: u64,
        error: FailureReport,
    },
    Cancelled {
        stream: WorkStream,
        generation: u64,
    },
}

impl SupervisorEvent {
    pub fn stream(&self) -> WorkStream {
        match self {
            Self::Started { stream, .. }
            | Self::Progress { stream, .. }
            | Self::Completed { stream, .. }
            | Self::Failed { stream, .. }
            | Self::Cancelled { stream, .. } => *stream,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            Self::Started { generation, .. }
            | Self::Progress { generation, .. }
            | Self::Completed { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Cancelled { generation, .. } => *generation,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// A loaded source: where it is and what the probe found.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub path: PathBuf,
    pub probe: ProbeResult,
    pub info: MediaInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSnapshot {
    pub preview: StreamSnapshot,
    pub export: StreamSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

type Reply<T> = oneshot::Sender<Result<T, AppError>>;

enum Command {
    LoadSource {
        path: PathBuf,
        reply: Reply<SourceInfo>,
    },
    Preview {
        settings: CompressionSettings,
        clip: Option<ClipWindow>,
        reply: Reply<u64>,
    },
    Export {
        settings: CompressionSettings,
        output: PathBuf,
        reply: Reply<u64>,
    },
    Cancel(WorkStream),
    Snapshot {
        reply: Reply<SupervisorSnapshot>,
    },
    CommandPreview {
        settings: CompressionSettings,
        clip: Option<ClipWindow>,
        output: PathBuf,
        reply: Reply<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    Probed {
        ticket: u64,
        path: PathBuf,
        result: Result<(ProbeResult, MediaInfo), AppError>,
        reply: Reply<SourceInfo>,
    },
    Progress {
        stream: WorkStream,
        generation: u64,
        progress: f64,
    },
    Finished {
        stream: WorkStream,
        generation: u64,
        output: PathBuf,
        outcome: ExitOutcome,
    },
    Committed {
        stream: WorkStream,
        generation: u64,
        output: PathBuf,
        destination: PathBuf,
        result: std::io::Result<()>,
    },
}

fn stopped() -> AppError {
    AppError::Cancelled
}

fn no_source() -> AppError {
    AppError::UnsupportedInput("No source loaded".to_string())
}

/// Cloneable front door to a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SupervisorHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, AppError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Probe and adopt a new source. In-flight preview work is cancelled.
    pub async fn load_source(&self, path: impl Into<PathBuf>) -> Result<SourceInfo, AppError> {
        let path = path.into();
        self.call(|reply| Command::LoadSource { path, reply }).await
    }

    /// Queue a preview. Returns the generation assigned to this request; only
    /// the last request within the debounce window actually runs.
    pub async fn request_preview(
        &self,
        settings: CompressionSettings,
        clip: Option<ClipWindow>,
    ) -> Result<u64, AppError> {
        self.call(|reply| Command::Preview {
            settings,
            clip,
            reply,
        })
        .await
    }

    /// Start a full export. Fails with `Busy` while another export runs.
    pub async fn request_export(
        &self,
        settings: CompressionSettings,
        output: impl Into<PathBuf>,
    ) -> Result<u64, AppError> {
        let output = output.into();
        self.call(|reply| Command::Export {
            settings,
            output,
            reply,
        })
        .await
    }

    pub fn cancel_preview(&self) {
        let _ = self.commands.send(Command::Cancel(WorkStream::Preview));
    }

    pub fn cancel_export(&self) {
        let _ = self.commands.send(Command::Cancel(WorkStream::Export));
    }

    pub async fn snapshot(&self) -> Result<SupervisorSnapshot, AppError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// The argv an export (or a clipped preview) of the current source would run.
    pub async fn command_preview(
        &self,
        settings: CompressionSettings,
        clip: Option<ClipWindow>,
        output: impl Into<PathBuf>,
    ) -> Result<Vec<String>, AppError> {
        let output = output.into();
        self.call(|reply| Command::CommandPreview {
            settings,
            clip,
            output,
            reply,
        })
        .await
    }

    /// Cancel everything in flight and stop the actor.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Lifecycle events, in the order the supervisor produced them.
#[derive(Debug)]
pub struct SupervisorEvents {
    rx: mpsc::UnboundedReceiver<SupervisorEvent>,
}

impl SupervisorEvents {
    pub async fn recv(&mut self) -> Option<SupervisorEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SupervisorEvent> {
        self.rx.try_recv().ok()
    }
}

struct PendingPreview {
    generation: u64,
    settings: CompressionSettings,
    clip: Option<ClipWindow>,
    deadline: Instant,
}

pub struct TaskSupervisor {
    config: SupervisorConfig,
    toolchain: Toolchain,
    temp: TempFileManager,
    source: Option<SourceInfo>,
    /// Ticket of the newest load. Probe results for older tickets are dropped.
    load_ticket: u64,
    preview: Lane,
    export: Lane,
    pending_preview: Option<PendingPreview>,
    /// Last completed preview output. Deleted when replaced.
    last_preview: Option<PathBuf>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    internal: mpsc::UnboundedSender<Internal>,
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Settings that can be applied to a source of `kind`. Audio can be extracted from video.
fn check_kind(probe: &ProbeResult, settings: &CompressionSettings) -> Result<(), AppError> {
    let wanted = settings.kind();
    if wanted == probe.kind || (wanted == MediaKind::Audio && probe.kind == MediaKind::Video) {
        Ok(())
    } else {
        Err(AppError::InvalidSettings(format!(
            "{:?} settings cannot be applied to a {:?} source",
            wanted, probe.kind
        )))
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl TaskSupervisor {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(config: SupervisorConfig, toolchain: Toolchain) -> (SupervisorHandle, SupervisorEvents) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let actor = TaskSupervisor {
            temp: TempFileManager::new(&config.temp_dir),
            config,
            toolchain,
            source: None,
            load_ticket: 0,
            preview: Lane::new(WorkStream::Preview),
            export: Lane::new(WorkStream::Export),
            pending_preview: None,
            last_preview: None,
            events: event_tx,
            internal: internal_tx,
        };
        tokio::spawn(actor.run(cmd_rx, internal_rx));
        (
            SupervisorHandle { commands: cmd_tx },
            SupervisorEvents { rx: event_rx },
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        log::debug!(
            target: "mediapress::supervisor",
            "Supervisor started (debounce={:?}, temp_dir={})",
            self.config.debounce,
            self.config.temp_dir.display()
        );
        loop {
            let deadline = self.pending_preview.as_ref().map(|p| p.deadline);
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(msg) = internal.recv() => self.handle_internal(msg),
                _ = wait_for_deadline(deadline) => self.submit_preview(),
            }
        }
        log::debug!(target: "mediapress::supervisor", "Supervisor stopped");
    }

    fn lane_mut(&mut self, stream: WorkStream) -> &mut Lane {
        match stream {
            WorkStream::Preview => &mut self.preview,
            WorkStream::Export => &mut self.export,
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        log::trace!(target: "mediapress::supervisor", "event: {:?}", event);
        let _ = self.events.send(event);
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::LoadSource { path, reply } => self.load_source(path, reply),
            Command::Preview {
                settings,
                clip,
                reply,
            } => {
                let _ = reply.send(self.request_preview(settings, clip));
            }
            Command::Export {
                settings,
                output,
                reply,
            } => {
                let _ = reply.send(self.request_export(settings, output));
            }
            Command::Cancel(stream) => self.cancel(stream),
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(SupervisorSnapshot {
                    preview: self.preview.snapshot(),
                    export: self.export.snapshot(),
                    source: self.source.as_ref().map(|s| s.path.clone()),
                }));
            }
            Command::CommandPreview {
                settings,
                clip,
                output,
                reply,
            } => {
                let result = self.source.as_ref().ok_or_else(no_source).and_then(|source| {
                    build_command(
                        &source.path,
                        &settings,
                        clip.as_ref(),
                        &output,
                        &self.toolchain.capabilities,
                        Some(&source.info),
                    )
                });
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
            }
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Probed {
                ticket,
                path,
                result,
                reply,
            } => self.on_probed(ticket, path, result, reply),
            Internal::Progress {
                stream,
                generation,
                progress,
            } => {
                let lane = match stream {
                    WorkStream::Preview => &self.preview,
                    WorkStream::Export => &self.export,
                };
                if let Some(task) = lane.active(generation) {
                    self.emit(SupervisorEvent::Progress {
                        stream,
                        generation,
                        progress,
                        label: task.label.clone(),
                    });
                }
            }
            Internal::Finished {
                stream,
                generation,
                output,
                outcome,
            } => self.on_finished(stream, generation, output, outcome),
            Internal::Committed {
                stream,
                generation,
                output,
                destination,
                result,
            } => self.on_committed(stream, generation, output, destination, result),
        }
    }

    fn load_source(&mut self, path: PathBuf, reply: Reply<SourceInfo>) {
        self.load_ticket += 1;
        let ticket = self.load_ticket;
        let probe = Arc::clone(&self.toolchain.probe);
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let probe_path = path.clone();
            let result = tokio::task::spawn_blocking(move || probe.inspect(&probe_path))
                .await
                .unwrap_or_else(|e| Err(AppError::Internal(format!("Probe task failed: {}", e))));
            let _ = tx.send(Internal::Probed {
                ticket,
                path,
                result,
                reply,
            });
        });
    }

    fn on_probed(
        &mut self,
        ticket: u64,
        path: PathBuf,
        result: Result<(ProbeResult, MediaInfo), AppError>,
        reply: Reply<SourceInfo>,
    ) {
        if ticket != self.load_ticket {
            log::debug!(
                target: "mediapress::supervisor",
                "Discarding superseded load of {} (ticket {}, newest {})",
                path.display(),
                ticket,
                self.load_ticket
            );
            let _ = reply.send(Err(AppError::Stale));
            return;
        }
        let outcome = result.and_then(|(probe, info)| {
            if probe.supported {
                Ok(SourceInfo { path, probe, info })
            } else {
                Err(AppError::UnsupportedInput(format!(
                    "{} is not a readable media file",
                    path.display()
                )))
            }
        });
        if let Ok(source) = &outcome {
            log::info!(
                target: "mediapress::supervisor",
                "Source loaded: {} ({:?}, {:.2}s)",
                source.path.display(),
                source.probe.kind,
                source.info.duration_secs
            );
            self.cancel(WorkStream::Preview);
            if let Some(previous) = self.last_preview.take() {
                remove_if_exists(&previous);
            }
            self.source = Some(source.clone());
        }
        let _ = reply.send(outcome);
    }

    fn request_preview(
        &mut self,
        settings: CompressionSettings,
        clip: Option<ClipWindow>,
    ) -> Result<u64, AppError> {
        settings.validate()?;
        let source = self.source.as_ref().ok_or_else(no_source)?;
        check_kind(&source.probe, &settings)?;

        let generation = self.preview.advance();
        self.preview.interrupt();
        self.preview.debounce();
        self.pending_preview = Some(PendingPreview {
            generation,
            settings,
            clip,
            deadline: Instant::now() + self.config.debounce,
        });
        log::trace!(
            target: "mediapress::supervisor",
            "preview generation {} queued",
            generation
        );
        Ok(generation)
    }

    fn submit_preview(&mut self) {
        let Some(pending) = self.pending_preview.take() else {
            return;
        };
        let generation = pending.generation;
        if generation != self.preview.generation() {
            return;
        }
        if let Err(err) = self.start_task(
            WorkStream::Preview,
            generation,
            &pending.settings,
            pending.clip,
            None,
        ) {
            self.fail(WorkStream::Preview, generation, err);
        }
    }

    fn request_export(
        &mut self,
        settings: CompressionSettings,
        output: PathBuf,
    ) -> Result<u64, AppError> {
        settings.validate()?;
        let source = self.source.as_ref().ok_or_else(no_source)?;
        check_kind(&source.probe, &settings)?;
        if same_path(&source.path, &output) {
            return Err(AppError::InvalidSettings(
                "Output must differ from the source file".to_string(),
            ));
        }
        if self.export.is_busy() {
            return Err(AppError::Busy(format!(
                "An export is already running (generation {})",
                self.export.generation()
            )));
        }
        let generation = self.export.advance();
        self.start_task(WorkStream::Export, generation, &settings, None, Some(output))?;
        Ok(generation)
    }

    fn start_task(
        &mut self,
        stream: WorkStream,
        generation: u64,
        settings: &CompressionSettings,
        clip: Option<ClipWindow>,
        destination: Option<PathBuf>,
    ) -> Result<(), AppError> {
        let source = self.source.as_ref().ok_or_else(no_source)?;
        let extension = destination
            .as_deref()
            .and_then(Path::extension)
            .and_then(|e| e.to_str())
            .unwrap_or(settings.output_extension())
            .to_string();
        let output = self
            .temp
            .create(&format!("{}-{}.{}", stream.as_str(), generation, extension))?;
        let args = build_command(
            &source.path,
            settings,
            clip.as_ref(),
            &output,
            &self.toolchain.capabilities,
            Some(&source.info),
        )?;
        let total = clip
            .map(|c| c.duration_secs)
            .or_else(|| (source.info.duration_secs > 0.0).then_some(source.info.duration_secs));

        let progress_tx = self.internal.clone();
        let sink: ProgressSink = Arc::new(move |progress| {
            let _ = progress_tx.send(Internal::Progress {
                stream,
                generation,
                progress,
            });
        });
        let request = ProcessRequest::new(&self.toolchain.ffmpeg, args).with_progress(total, sink);
        let handle = self.toolchain.runner.spawn(request)?;
        let cancel = handle.cancel_handle();

        let done_tx = self.internal.clone();
        let watched = output.clone();
        tokio::spawn(async move {
            let outcome = handle.wait().await;
            if outcome != ExitOutcome::Success {
                remove_if_exists(&watched);
            }
            let finished = Internal::Finished {
                stream,
                generation,
                output: watched,
                outcome,
            };
            if let Err(mpsc::error::SendError(Internal::Finished { output, .. })) =
                done_tx.send(finished)
            {
                // Supervisor is gone; nobody will claim this output.
                remove_if_exists(&output);
            }
        });

        let label = destination
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());
        log::info!(
            target: "mediapress::supervisor",
            "{} generation {} started -> {}",
            stream.as_str(),
            generation,
            destination.as_deref().unwrap_or(&output).display()
        );
        self.lane_mut(stream).start(ActiveTask {
            generation,
            cancel,
            output,
            destination,
            label,
            committing: false,
        });
        self.emit(SupervisorEvent::Started { stream, generation });
        Ok(())
    }

    fn on_finished(
        &mut self,
        stream: WorkStream,
        generation: u64,
        output: PathBuf,
        outcome: ExitOutcome,
    ) {
        if self.lane_mut(stream).active(generation).is_none() {
            log::debug!(
                target: "mediapress::supervisor",
                "Discarding stale {} generation {} ({:?})",
                stream.as_str(),
                generation,
                outcome
            );
            remove_if_exists(&output);
            return;
        }
        if outcome == ExitOutcome::Success {
            if let Some(destination) = self.lane_mut(stream).begin_commit(generation) {
                self.commit(stream, generation, output, destination);
                return;
            }
        }
        self.lane_mut(stream).take_active(generation);

        match outcome {
            ExitOutcome::Success => {
                if let Some(previous) = self.last_preview.replace(output.clone()) {
                    remove_if_exists(&previous);
                }
                self.complete(stream, generation, output);
            }
            ExitOutcome::NonZeroExit { code, stderr } => {
                self.fail(stream, generation, AppError::ProcessFailed { code, stderr });
            }
            ExitOutcome::Cancelled => {
                self.lane_mut(stream).finish(OutcomeKind::Cancelled);
                self.emit(SupervisorEvent::Cancelled { stream, generation });
            }
        }
    }

    /// Move a finished export into place on the blocking pool. Across
    /// filesystems this is a full copy, which must not stall the actor.
    fn commit(&self, stream: WorkStream, generation: u64, output: PathBuf, destination: PathBuf) {
        log::debug!(
            target: "mediapress::supervisor",
            "{} generation {} committing {} -> {}",
            stream.as_str(),
            generation,
            output.display(),
            destination.display()
        );
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let (from, to) = (output.clone(), destination.clone());
            let result = tokio::task::spawn_blocking(move || move_file(&from, &to))
                .await
                .unwrap_or_else(|e| Err(std::io::Error::other(format!("Move task failed: {}", e))));
            let _ = tx.send(Internal::Committed {
                stream,
                generation,
                output,
                destination,
                result,
            });
        });
    }

    fn on_committed(
        &mut self,
        stream: WorkStream,
        generation: u64,
        output: PathBuf,
        destination: PathBuf,
        result: std::io::Result<()>,
    ) {
        if self.lane_mut(stream).take_active(generation).is_none() {
            return;
        }
        match result {
            Ok(()) => self.complete(stream, generation, destination),
            Err(e) => {
                remove_if_exists(&output);
                self.fail(stream, generation, AppError::Io(e));
            }
        }
    }

    fn complete(&mut self, stream: WorkStream, generation: u64, output: PathBuf) {
        log::info!(
            target: "mediapress::supervisor",
            "{} generation {} completed: {}",
            stream.as_str(),
            generation,
            output.display()
        );
        self.lane_mut(stream).finish(OutcomeKind::Completed);
        self.emit(SupervisorEvent::Completed {
            stream,
            generation,
            output,
        });
    }

    fn fail(&mut self, stream: WorkStream, generation: u64, err: AppError) {
        if err.is_silent() {
            self.lane_mut(stream).finish(OutcomeKind::Cancelled);
            return;
        }
        log::warn!(
            target: "mediapress::supervisor",
            "{} generation {} failed: {}",
            stream.as_str(),
            generation,
            err
        );
        self.lane_mut(stream).finish(OutcomeKind::Failed);
        self.emit(SupervisorEvent::Failed {
            stream,
            generation,
            error: FailureReport::from_error(&err),
        });
    }

    /// Cancel pending and running work on a lane. Emits `Cancelled` only when
    /// something was actually in flight.
    fn cancel(&mut self, stream: WorkStream) {
        let pending = match stream {
            WorkStream::Preview => self.pending_preview.take().map(|p| p.generation),
            WorkStream::Export => None,
        };
        let lane = self.lane_mut(stream);
        let running = lane.interrupt().map(|t| t.generation);
        if let Some(generation) = running.or(pending) {
            lane.finish(OutcomeKind::Cancelled);
            log::info!(
                target: "mediapress::supervisor",
                "{} generation {} cancelled",
                stream.as_str(),
                generation
            );
            self.emit(SupervisorEvent::Cancelled { stream, generation });
        }
    }

    fn stop(&mut self) {
        self.cancel(WorkStream::Preview);
        self.cancel(WorkStream::Export);
        if let Some(previous) = self.last_preview.take() {
            remove_if_exists(&previous);
        }
    }
}
