//! Needs a real FFmpeg on the machine: `cargo test --features integration-test-api`.
#![cfg(feature = "integration-test-api")]

mod support;

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use mediapress_core::editor::EditorSession;
use mediapress_core::ffmpeg::MediaKind;
use mediapress_core::settings::{AudioSettings, CompressionSettings};
use mediapress_core::supervisor::{SupervisorEvent, WorkStream};
use mediapress_core::toolchain::Toolchain;

use support::{test_config, until_terminal};

fn generate_test_video(ffmpeg: &Path, output: &Path) {
    let status = Command::new(ffmpeg)
        .args([
            "-hide_banner",
            "-y",
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=2:size=320x240:rate=15",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:duration=2",
            "-shortest",
            "-pix_fmt",
            "yuv420p",
        ])
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("run ffmpeg to generate test input");
    assert!(status.success(), "test input generation failed");
}

#[tokio::test]
async fn export_and_audio_extract_with_real_ffmpeg() {
    let toolchain = tokio::task::spawn_blocking(Toolchain::discover)
        .await
        .expect("join")
        .expect("FFmpeg available");
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("source.mp4");
    generate_test_video(&toolchain.ffmpeg, &source);

    let (mut editor, mut events) = EditorSession::new(
        test_config(dir.path()).with_debounce(Duration::from_millis(50)),
        toolchain,
    );
    let info = editor.load(&source).await.expect("load");
    assert_eq!(info.probe.kind, MediaKind::Video);
    assert!(info.info.duration_secs > 1.5);
    assert_eq!((info.info.width, info.info.height), (320, 240));

    let preview = until_terminal(&mut events).await;
    assert!(
        matches!(preview.last(), Some(SupervisorEvent::Completed { stream: WorkStream::Preview, .. })),
        "{:?}",
        preview
    );

    let video_out = dir.path().join("out.mp4");
    editor.on_save(&video_out).await.expect("export");
    let export = until_terminal(&mut events).await;
    assert!(
        matches!(export.last(), Some(SupervisorEvent::Completed { .. })),
        "{:?}",
        export
    );
    assert!(video_out.metadata().expect("output").len() > 0);

    editor
        .on_settings_changed(CompressionSettings::Audio(AudioSettings::default()))
        .await
        .expect("audio settings on a video source");
    let _ = until_terminal(&mut events).await;
    let audio_out = dir.path().join("out.mp3");
    editor.on_save(&audio_out).await.expect("audio export");
    let audio = until_terminal(&mut events).await;
    assert!(
        matches!(audio.last(), Some(SupervisorEvent::Completed { .. })),
        "{:?}",
        audio
    );
    editor.shutdown().await;
}
