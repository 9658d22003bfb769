mod support;

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use mediapress_core::error::AppError;
use mediapress_core::ffmpeg::{ExitOutcome, MediaInfo, MediaProbe, ProbeResult};
use mediapress_core::toolchain::Toolchain;
use mediapress_core::settings::{CompressionSettings, ScaleFactor, VideoFormat, VideoSettings};
use mediapress_core::supervisor::{
    OutcomeKind, StreamPhase, SupervisorEvent, TaskSupervisor, WorkStream,
};

use support::{
    FakeProbe, FakeRunner, Plan, arg_after, full_capabilities, next_event, settle, test_config,
    toolchain_with, touch, until_terminal,
};

fn video(quality: u32) -> CompressionSettings {
    CompressionSettings::Video(
        VideoSettings::default()
            .with_format(VideoFormat::Mp4H264)
            .with_quality(quality),
    )
}

#[tokio::test(start_paused = true)]
async fn debounce_coalesces_rapid_requests_into_one_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let runner = FakeRunner::succeeding();
    let (handle, mut events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(runner.clone()));
    handle.load_source(&source).await.expect("load");

    for (i, quality) in [20, 40, 60, 80].into_iter().enumerate() {
        if i > 0 {
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        handle
            .request_preview(video(quality), None)
            .await
            .expect("queue preview");
    }

    // Last request at t=300ms; its window closes at t=800ms.
    tokio::time::advance(Duration::from_millis(499)).await;
    settle().await;
    assert_eq!(runner.spawn_count(), 0, "nothing runs inside the window");

    tokio::time::advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(runner.spawn_count(), 1, "exactly one task for the burst");

    let expected = handle
        .command_preview(video(80), None, dir.path().join("x.mp4"))
        .await
        .expect("expected argv");
    let spawned = runner.spawned();
    assert_eq!(arg_after(&spawned[0], "-crf"), arg_after(&expected, "-crf"));

    let started = next_event(&mut events, Duration::from_secs(5)).await;
    assert_eq!(
        started,
        SupervisorEvent::Started {
            stream: WorkStream::Preview,
            generation: 4
        }
    );
    match next_event(&mut events, Duration::from_secs(5)).await {
        SupervisorEvent::Completed {
            stream,
            generation,
            output,
        } => {
            assert_eq!(stream, WorkStream::Preview);
            assert_eq!(generation, 4);
            assert!(output.exists());
        }
        other => panic!("expected completion, got {:?}", other),
    }
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn preview_generations_increase_monotonically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let (handle, _events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(FakeRunner::holding()));
    handle.load_source(&source).await.expect("load");

    let mut previous = 0;
    for quality in [10, 30, 50, 70, 90] {
        let generation = handle
            .request_preview(video(quality), None)
            .await
            .expect("queue preview");
        assert!(generation > previous);
        previous = generation;
    }
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.preview.generation, previous);
    assert_eq!(snapshot.preview.phase, StreamPhase::Debouncing);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn second_export_is_rejected_while_one_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let runner = FakeRunner::holding();
    let (handle, mut events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(runner.clone()));
    handle.load_source(&source).await.expect("load");

    let destination = dir.path().join("out.mp4");
    let generation = handle
        .request_export(video(60), &destination)
        .await
        .expect("first export");
    let second = handle
        .request_export(video(60), dir.path().join("other.mp4"))
        .await;
    assert!(matches!(second, Err(AppError::Busy(_))), "got {:?}", second);

    settle().await;
    assert!(runner.release(0, ExitOutcome::Success));
    let seen = until_terminal(&mut events).await;
    assert_eq!(
        seen.last(),
        Some(&SupervisorEvent::Completed {
            stream: WorkStream::Export,
            generation,
            output: destination.clone(),
        })
    );
    assert!(destination.exists());

    let third = handle
        .request_export(video(60), dir.path().join("again.mp4"))
        .await
        .expect("lane is free again");
    assert_eq!(third, generation + 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn export_into_the_source_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let (handle, _events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(FakeRunner::holding()));
    handle.load_source(&source).await.expect("load");
    let result = handle.request_export(video(60), &source).await;
    assert!(matches!(result, Err(AppError::InvalidSettings(_))));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_preview_keeps_previous_output_and_returns_to_idle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    // Downscaled renders fail; full-size ones succeed.
    let runner = FakeRunner::new(|args| {
        if args.iter().any(|a| a == "-vf") {
            Plan::Fail {
                code: 1,
                stderr: "Conversion failed!".to_string(),
            }
        } else {
            Plan::Succeed
        }
    });
    let (handle, mut events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(runner.clone()));
    handle.load_source(&source).await.expect("load");

    handle.request_preview(video(60), None).await.expect("queue");
    let first = until_terminal(&mut events).await;
    let Some(SupervisorEvent::Completed { output: kept, .. }) = first.last().cloned() else {
        panic!("expected completion, got {:?}", first);
    };

    let half = CompressionSettings::Video(VideoSettings::default().with_scale(ScaleFactor::Half));
    let generation = handle.request_preview(half, None).await.expect("queue");
    let second = until_terminal(&mut events).await;
    match second.last() {
        Some(SupervisorEvent::Failed {
            stream,
            generation: failed,
            error,
        }) => {
            assert_eq!(*stream, WorkStream::Preview);
            assert_eq!(*failed, generation);
            assert!(error.detail.contains("Conversion failed!"));
            assert_eq!(error.code, Some(1));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(kept.exists(), "previous preview survives a failed render");

    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.preview.phase, StreamPhase::Idle);
    assert_eq!(snapshot.preview.last_outcome, Some(OutcomeKind::Failed));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelling_twice_reports_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let runner = FakeRunner::holding();
    let (handle, mut events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(runner.clone()));
    handle.load_source(&source).await.expect("load");

    let generation = handle.request_preview(video(50), None).await.expect("queue");
    let started = next_event(&mut events, Duration::from_secs(5)).await;
    assert_eq!(started.generation(), generation);

    handle.cancel_preview();
    handle.cancel_preview();
    let cancelled = next_event(&mut events, Duration::from_secs(5)).await;
    assert_eq!(
        cancelled,
        SupervisorEvent::Cancelled {
            stream: WorkStream::Preview,
            generation
        }
    );

    settle().await;
    assert_eq!(events.try_recv(), None, "no second cancel and no late completion");
    assert!(!runner.release(0, ExitOutcome::Success), "task already gone");
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.preview.last_outcome, Some(OutcomeKind::Cancelled));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn superseded_preview_is_never_surfaced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let runner = FakeRunner::holding();
    let (handle, mut events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(runner.clone()));
    handle.load_source(&source).await.expect("load");

    let first = handle.request_preview(video(30), None).await.expect("queue");
    assert_eq!(next_event(&mut events, Duration::from_secs(5)).await.generation(), first);

    let second = handle.request_preview(video(70), None).await.expect("queue");
    let started = next_event(&mut events, Duration::from_secs(5)).await;
    assert_eq!(
        started,
        SupervisorEvent::Started {
            stream: WorkStream::Preview,
            generation: second
        }
    );
    assert_eq!(runner.spawn_count(), 2);

    assert!(runner.release(1, ExitOutcome::Success));
    let done = next_event(&mut events, Duration::from_secs(5)).await;
    assert!(
        matches!(done, SupervisorEvent::Completed { generation, .. } if generation == second),
        "got {:?}",
        done
    );
    settle().await;
    assert_eq!(events.try_recv(), None);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unreadable_source_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "notes.bad");
    let (handle, _events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(FakeRunner::holding()));
    let result = handle.load_source(&source).await;
    assert!(matches!(result, Err(AppError::UnsupportedInput(_))));
    let preview = handle.request_preview(video(50), None).await;
    assert!(matches!(preview, Err(AppError::UnsupportedInput(_))), "nothing loaded");
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_settings_never_reach_the_runner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let runner = FakeRunner::succeeding();
    let (handle, _events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(runner.clone()));
    handle.load_source(&source).await.expect("load");
    let result = handle.request_preview(video(0), None).await;
    assert!(matches!(result, Err(AppError::InvalidSettings(_))));
    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(runner.spawn_count(), 0);
    handle.shutdown().await;
}

/// Holds inspection of one file name until the test opens the gate.
struct GatedProbe {
    gated: &'static str,
    entered: Mutex<Option<oneshot::Sender<()>>>,
    gate: Mutex<Option<std_mpsc::Receiver<()>>>,
    inner: FakeProbe,
}

impl MediaProbe for GatedProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult, AppError> {
        self.inner.probe(path)
    }

    fn info(&self, path: &Path) -> Result<MediaInfo, AppError> {
        self.inner.info(path)
    }

    fn inspect(&self, path: &Path) -> Result<(ProbeResult, MediaInfo), AppError> {
        if path.file_name().and_then(|n| n.to_str()) == Some(self.gated) {
            if let Some(entered) = self.entered.lock().take() {
                let _ = entered.send(());
            }
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
        }
        Ok((self.inner.probe(path)?, self.inner.info(path)?))
    }
}

#[tokio::test]
async fn newest_load_wins_over_a_slower_earlier_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = touch(dir.path(), "first.mp4");
    let second = touch(dir.path(), "second.mp4");
    let (entered_tx, entered_rx) = oneshot::channel();
    let (gate_tx, gate_rx) = std_mpsc::channel();
    let probe = GatedProbe {
        gated: "first.mp4",
        entered: Mutex::new(Some(entered_tx)),
        gate: Mutex::new(Some(gate_rx)),
        inner: FakeProbe::default(),
    };
    let toolchain = Toolchain::from_parts(
        "/usr/bin/ffmpeg",
        FakeRunner::succeeding(),
        Arc::new(probe),
        full_capabilities(),
    );
    let (handle, _events) = TaskSupervisor::spawn(test_config(dir.path()), toolchain);

    let first_load = tokio::spawn({
        let handle = handle.clone();
        let first = first.clone();
        async move { handle.load_source(first).await }
    });
    entered_rx.await.expect("first inspection started");

    let info = handle.load_source(&second).await.expect("second load");
    assert_eq!(info.path, second);

    gate_tx.send(()).expect("open gate");
    let outcome = first_load.await.expect("join");
    assert!(matches!(outcome, Err(AppError::Stale)), "got {:?}", outcome);

    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.source, Some(second));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_after_the_tool_finished_still_delivers_the_export() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = touch(dir.path(), "clip.mp4");
    let runner = FakeRunner::holding();
    let (handle, mut events) =
        TaskSupervisor::spawn(test_config(dir.path()), toolchain_with(runner.clone()));
    handle.load_source(&source).await.expect("load");

    let destination = dir.path().join("final.mp4");
    let generation = handle
        .request_export(video(60), &destination)
        .await
        .expect("export starts");
    settle().await;
    assert!(runner.release(0, ExitOutcome::Success));
    settle().await;
    handle.cancel_export();

    let seen = until_terminal(&mut events).await;
    assert_eq!(
        seen.last(),
        Some(&SupervisorEvent::Completed {
            stream: WorkStream::Export,
            generation,
            output: destination.clone(),
        })
    );
    assert_eq!(std::fs::read(&destination).expect("moved into place"), b"encoded");
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.export.last_outcome, Some(OutcomeKind::Completed));
    handle.shutdown().await;
}
