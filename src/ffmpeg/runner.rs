//! External process spawning, cancellation and progress parsing.
//!
//! A runner turns a `ProcessRequest` into a `TaskHandle`: a cancel switch plus
//! a completion future. The tokio runner reads the child's diagnostic stream
//! in a background task, reports normalized progress through the request's
//! sink, and keeps the tail of the text for failure reports. Cancellation kills
//! and reaps the child before the completion resolves, so the output path is
//! free again as soon as `wait` returns.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, watch};

use super::progress::parse_ffmpeg_progress;
use crate::error::AppError;

/// Receives normalized progress in [0,1].
pub type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

/// Minimum interval between progress emits for small changes.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of diagnostic text to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

pub struct ProcessRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub total_duration_secs: Option<f64>,
    pub progress: Option<ProgressSink>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            total_duration_secs: None,
            progress: None,
        }
    }

    /// Progress is only computed when a positive total is known (or found in the stream).
    pub fn with_progress(mut self, total_duration_secs: Option<f64>, sink: ProgressSink) -> Self {
        self.total_duration_secs = total_duration_secs.filter(|d| *d > 0.0);
        self.progress = Some(sink);
        self
    }
}

impl std::fmt::Debug for ProcessRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRequest")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("total_duration_secs", &self.total_duration_secs)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    NonZeroExit { code: i32, stderr: String },
    Cancelled,
}

/// Cloneable cancel switch for one task. Cancelling twice is a no-op.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Returns true only for the call that actually requested cancellation.
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct TaskHandle {
    cancel: CancelHandle,
    completion: oneshot::Receiver<ExitOutcome>,
}

/// Runner-side end of a `TaskHandle`.
pub struct TaskControl {
    completion: oneshot::Sender<ExitOutcome>,
    cancel_rx: watch::Receiver<bool>,
}

impl TaskHandle {
    /// A handle not yet bound to a process. Runner strategies (and test doubles)
    /// drive it through the returned `TaskControl`.
    pub fn detached() -> (TaskHandle, TaskControl) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        (
            TaskHandle {
                cancel: CancelHandle {
                    tx: Arc::new(cancel_tx),
                },
                completion: done_rx,
            },
            TaskControl {
                completion: done_tx,
                cancel_rx,
            },
        )
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn wait(self) -> ExitOutcome {
        // Keep the switch alive while waiting so the runner never sees a dropped sender.
        let _cancel = self.cancel;
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(_) => ExitOutcome::NonZeroExit {
                code: -1,
                stderr: "process runner dropped the task".to_string(),
            },
        }
    }
}

impl TaskControl {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the handle is dropped uncancelled.
    pub async fn cancelled(&mut self) {
        if self.cancel_rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn finish(self, outcome: ExitOutcome) {
        let _ = self.completion.send(outcome);
    }
}

pub trait ProcessRunner: Send + Sync {
    /// Start `request`. Must be called from within a tokio runtime.
    fn spawn(&self, request: ProcessRequest) -> Result<TaskHandle, AppError>;
}

/// Tracks progress for one task: non-decreasing, clamped, throttled.
pub(crate) struct ProgressTracker {
    duration: Option<f64>,
    sink: Option<ProgressSink>,
    last_emit: Option<Instant>,
    last_progress: f64,
}

impl ProgressTracker {
    pub(crate) fn new(duration: Option<f64>, sink: Option<ProgressSink>) -> Self {
        Self {
            duration: duration.filter(|d| *d > 0.0),
            sink,
            last_emit: None,
            last_progress: 0.0,
        }
    }

    pub(crate) fn observe(&mut self, chunk: &str) {
        let (progress, duration) = parse_ffmpeg_progress(chunk, self.duration);
        if duration.is_some() {
            self.duration = duration;
        }
        let (Some(p), Some(sink)) = (progress, self.sink.as_ref()) else {
            return;
        };
        if p < self.last_progress || (self.last_emit.is_some() && p == self.last_progress) {
            return;
        }
        let now = Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(at) => {
                now.duration_since(at) >= PROGRESS_EMIT_INTERVAL
                    || p - self.last_progress >= 0.01
                    || p >= 1.0
            }
        };
        if due {
            self.last_emit = Some(now);
            self.last_progress = p;
            sink(p);
        }
    }
}

/// Runs the external tool with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegRunner;

fn spawn_error(program: &Path, e: io::Error) -> AppError {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => AppError::ToolUnavailable(
            format!("Failed to start {}: {}", program.display(), e),
        ),
        _ => AppError::Io(e),
    }
}

impl ProcessRunner for FfmpegRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<TaskHandle, AppError> {
        let input_arg = request
            .args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| request.args.get(i + 1));
        log::debug!(
            target: "mediapress::ffmpeg::runner",
            "Spawning: path={}, input={:?}, output={:?}",
            request.program.display(),
            input_arg,
            request.args.last()
        );

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(&request.program, e))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("Failed to capture stderr".to_string()))?;

        let (handle, control) = TaskHandle::detached();
        let tracker = ProgressTracker::new(request.total_duration_secs, request.progress);
        tokio::spawn(supervise_child(child, stderr, tracker, control));
        Ok(handle)
    }
}

async fn supervise_child(
    mut child: Child,
    stderr: ChildStderr,
    tracker: ProgressTracker,
    mut control: TaskControl,
) {
    let reader = tokio::spawn(read_diagnostics(stderr, tracker));

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = control.cancelled() => None,
    };

    let outcome = match waited {
        None => {
            if let Err(e) = child.kill().await {
                log::warn!(
                    target: "mediapress::ffmpeg::runner",
                    "Failed to kill cancelled process: {}",
                    e
                );
            }
            let _ = reader.await;
            log::info!(
                target: "mediapress::ffmpeg::runner",
                "Process terminated after cancellation"
            );
            ExitOutcome::Cancelled
        }
        Some(Ok(status)) => {
            let stderr_text = reader.await.unwrap_or_default();
            if control.is_cancelled() {
                ExitOutcome::Cancelled
            } else if status.success() {
                log::info!(
                    target: "mediapress::ffmpeg::runner",
                    "Process completed successfully"
                );
                ExitOutcome::Success
            } else {
                let code = exit_code(&status);
                let err_preview = stderr_text
                    .lines()
                    .rev()
                    .take(3)
                    .collect::<Vec<_>>()
                    .join("; ");
                log::error!(
                    target: "mediapress::ffmpeg::runner",
                    "Process failed (code={}): {}",
                    code,
                    err_preview
                );
                ExitOutcome::NonZeroExit {
                    code,
                    stderr: stderr_text,
                }
            }
        }
        Some(Err(e)) => {
            reader.abort();
            ExitOutcome::NonZeroExit {
                code: -1,
                stderr: format!("Failed to wait for process: {}", e),
            }
        }
    };
    control.finish(outcome);
}

/// Exit code, or 128 + N for a child killed by signal N.
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Reads the diagnostic stream to EOF. Status lines end in `\r`, log lines in `\n`.
async fn read_diagnostics(mut stderr: ChildStderr, mut tracker: ProgressTracker) -> String {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::with_capacity(256);
    let mut tail: Vec<u8> = Vec::new();
    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > MAX_STDERR_BYTES {
            let excess = tail.len() - MAX_STDERR_BYTES;
            tail.drain(..excess);
        }
        pending.extend_from_slice(&buf[..n]);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let chunk: Vec<u8> = pending.drain(..=pos).collect();
            tracker.observe(&String::from_utf8_lossy(&chunk));
        }
    }
    if !pending.is_empty() {
        tracker.observe(&String::from_utf8_lossy(&pending));
    }
    String::from_utf8_lossy(&tail).into_owned()
}
