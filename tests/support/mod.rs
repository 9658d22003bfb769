#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use mediapress_core::config::SupervisorConfig;
use mediapress_core::error::AppError;
use mediapress_core::ffmpeg::{
    CapabilitySet, ExitOutcome, MediaInfo, MediaKind, MediaProbe, ProbeResult, ProcessRequest,
    ProcessRunner, ProgressSink, TaskHandle,
};
use mediapress_core::supervisor::{SupervisorEvent, SupervisorEvents};
use mediapress_core::toolchain::Toolchain;

/// What the fake runner does with a spawned command.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Write the output file and exit 0 right away.
    Succeed,
    Fail { code: i32, stderr: String },
    /// Stay running until released or cancelled.
    Hold,
}

struct Held {
    release: Option<oneshot::Sender<ExitOutcome>>,
    progress: Option<ProgressSink>,
}

type Planner = Box<dyn Fn(&[String]) -> Plan + Send + Sync>;

/// In-memory `ProcessRunner`: records every argv and completes per a plan.
pub struct FakeRunner {
    planner: Planner,
    spawned: Mutex<Vec<Vec<String>>>,
    held: Mutex<Vec<Held>>,
}

impl FakeRunner {
    pub fn new(planner: impl Fn(&[String]) -> Plan + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            planner: Box::new(planner),
            spawned: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(|_| Plan::Succeed)
    }

    pub fn holding() -> Arc<Self> {
        Self::new(|_| Plan::Hold)
    }

    pub fn spawned(&self) -> Vec<Vec<String>> {
        self.spawned.lock().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().len()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Finish the `index`-th held task. False if it already finished.
    pub fn release(&self, index: usize, outcome: ExitOutcome) -> bool {
        let sender = self
            .held
            .lock()
            .get_mut(index)
            .and_then(|held| held.release.take());
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn report_progress(&self, index: usize, progress: f64) {
        let sink = self
            .held
            .lock()
            .get(index)
            .and_then(|held| held.progress.clone());
        if let Some(sink) = sink {
            sink(progress);
        }
    }
}

fn write_output(args: &[String]) {
    if let Some(output) = args.last() {
        std::fs::write(output, b"encoded").expect("write fake output");
    }
}

impl ProcessRunner for FakeRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<TaskHandle, AppError> {
        let args = request.args.clone();
        self.spawned.lock().push(args.clone());
        let (handle, mut control) = TaskHandle::detached();

        match (self.planner)(&args) {
            Plan::Succeed => {
                write_output(&args);
                control.finish(ExitOutcome::Success);
            }
            Plan::Fail { code, stderr } => {
                control.finish(ExitOutcome::NonZeroExit { code, stderr });
            }
            Plan::Hold => {
                let (tx, rx) = oneshot::channel();
                self.held.lock().push(Held {
                    release: Some(tx),
                    progress: request.progress.clone(),
                });
                tokio::spawn(async move {
                    let released = tokio::select! {
                        _ = control.cancelled() => None,
                        outcome = rx => outcome.ok(),
                    };
                    match released {
                        Some(ExitOutcome::Success) => {
                            write_output(&args);
                            control.finish(ExitOutcome::Success);
                        }
                        Some(outcome) => control.finish(outcome),
                        None => control.finish(ExitOutcome::Cancelled),
                    }
                });
            }
        }
        Ok(handle)
    }
}

/// Classifies by extension. `.bad` files are unreadable.
pub struct FakeProbe {
    pub duration_secs: f64,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            duration_secs: 10.0,
        }
    }
}

impl MediaProbe for FakeProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult, AppError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let (kind, supported) = match ext.as_str() {
            "mp4" | "mov" | "mkv" | "webm" => (MediaKind::Video, true),
            "png" | "jpg" | "jpeg" | "webp" => (MediaKind::Image, true),
            "mp3" | "wav" | "m4a" => (MediaKind::Audio, true),
            "bad" => (MediaKind::Unknown, false),
            _ => (MediaKind::Unknown, true),
        };
        Ok(ProbeResult {
            kind,
            supported,
            container: Some(ext),
        })
    }

    fn info(&self, path: &Path) -> Result<MediaInfo, AppError> {
        let still = self.probe(path)?.kind == MediaKind::Image;
        Ok(MediaInfo {
            duration_secs: if still { 0.0 } else { self.duration_secs },
            bitrate_kbps: 4_000,
            width: 1920,
            height: 1080,
            pixel_format: Some("yuv420p".to_string()),
            has_alpha: false,
        })
    }
}

pub fn full_capabilities() -> CapabilitySet {
    CapabilitySet::from_encoders([
        "libx264",
        "libx265",
        "libvpx-vp9",
        "libsvtav1",
        "mjpeg",
        "png",
        "libwebp",
        "libaom-av1",
        "libmp3lame",
        "aac",
        "libopus",
    ])
}

pub fn toolchain_with(runner: Arc<FakeRunner>) -> Toolchain {
    Toolchain::from_parts(
        "/usr/bin/ffmpeg",
        runner,
        Arc::new(FakeProbe::default()),
        full_capabilities(),
    )
}

pub fn test_config(temp_dir: &Path) -> SupervisorConfig {
    SupervisorConfig::default()
        .with_temp_dir(temp_dir)
        .with_debounce(Duration::from_millis(500))
}

/// Next event, failing the test if none arrives within `timeout` (virtual time when paused).
pub async fn next_event(events: &mut SupervisorEvents, timeout: Duration) -> SupervisorEvent {
    tokio::time::timeout(timeout, events.recv())
        .await
        .expect("timed out waiting for a supervisor event")
        .expect("supervisor stopped")
}

/// Wait for the first terminal event, collecting everything before it.
pub async fn until_terminal(events: &mut SupervisorEvents) -> Vec<SupervisorEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events, Duration::from_secs(30)).await;
        let done = event.is_terminal();
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Let spawned tasks run until nothing is runnable.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// The value following `flag` in an argv.
pub fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"source").expect("write source");
    path
}

/// Executable shell script standing in for the tool.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}
