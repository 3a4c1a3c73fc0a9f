// Integration tests for recording sessions
//
// These tests drive full recordings through the synthetic backend on a
// paused clock and check the files left on disk with the container probe.

mod common;

use anyhow::Result;
use common::{split_listener, stop_listener, Harness, MB};
use replay_recorder::capture::synthetic::SYNTHETIC_PRIMARY_MONITOR;
use replay_recorder::output::probe;
use replay_recorder::{ErrorCode, EventKind, RecorderError, RecorderEvent, RecordingOptions, SplitOptions};
use std::path::Path;
use tokio::time::{sleep, timeout, Duration, Instant};

#[tokio::test(start_paused = true)]
async fn test_five_second_recording_splits_twice() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    let base = h.base_path("session");
    let mut options = RecordingOptions::new(&base);
    options.split = Some(SplitOptions {
        enable_manual: false,
        max_time_second: Some(2),
        max_by_size_mb: None,
    });

    let (listener, stopped) = stop_listener();
    h.recorder.start_recording(options, Some(settings), Some(listener)).await?;
    sleep(Duration::from_secs(5)).await;
    h.recorder.stop_recording(None).await?;

    let stopped = stopped.await?;
    assert_eq!(stopped.base.reason, Some(ErrorCode::Success));
    assert!(!stopped.has_error);
    assert_eq!(stopped.split_count, Some(2));

    let last = stopped.duration.unwrap_or(0);
    assert!((500..=1500).contains(&last), "last segment lasted {}ms", last);

    for name in ["session.mp4", "session_1.mp4", "session_2.mp4"] {
        let report = probe(h.dir.path().join(name))?;
        assert!(report.is_playable(), "{} is not playable", name);
        assert!(report.starts_with_keyframe);
    }
    assert!(!h.dir.path().join("session_3.mp4").exists());

    let splits = h.events_of(EventKind::RecordingSplit);
    assert_eq!(splits.len(), 2);
    match &splits[0] {
        RecorderEvent::RecordingSplit(args) => {
            assert_eq!(args.split_count, 1);
            assert_eq!(args.duration, 2000);
            assert!(args.next_file_path.ends_with("session_1.mp4"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("first")), Some(settings.clone()), None)
        .await?;
    assert!(h.recorder.is_active());

    let err = h
        .recorder
        .start_recording(RecordingOptions::new(h.base_path("second")), Some(settings), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyRunning);

    sleep(Duration::from_millis(500)).await;
    h.recorder.stop_recording(None).await?;
    assert!(!h.dir.path().join("second.mp4").exists());
    assert!(probe(h.dir.path().join("first.mp4"))?.is_playable());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_double_stop_reports_no_active_recording() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    let err = h.recorder.stop_recording(None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveRecording);

    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("clip")), Some(settings), None)
        .await?;
    sleep(Duration::from_millis(300)).await;
    h.recorder.stop_recording(None).await?;

    let err = h.recorder.stop_recording(None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveRecording);
    assert_eq!(h.events_of(EventKind::RecordingStopped).len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_listener_can_be_replaced() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    let (first, first_rx) = stop_listener();
    let (second, second_rx) = stop_listener();
    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("clip")), Some(settings), Some(first))
        .await?;
    sleep(Duration::from_millis(300)).await;
    h.recorder.stop_recording(Some(second)).await?;

    assert!(second_rx.await.is_ok());
    assert!(first_rx.await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_low_disk_stops_gracefully() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    let (listener, stopped) = stop_listener();
    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("long")), Some(settings), Some(listener))
        .await?;
    sleep(Duration::from_secs(2)).await;

    h.host.set_free(10 * MB);
    let stopped = timeout(Duration::from_secs(10), stopped).await??;

    assert_eq!(stopped.base.reason, Some(ErrorCode::SuccessLowDiskSpace));
    assert!(!stopped.has_error);
    assert!(!h.recorder.is_active());

    let path = stopped.base.file_path.clone().unwrap_or_default();
    let report = probe(&path)?;
    assert!(report.finalized);
    assert!(report.is_playable());
    assert!(report.duration_ms >= 2000);
    Ok(())
}

#[tokio::test]
async fn test_low_disk_at_start_is_rejected() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;
    h.host.set_free(MB);

    let err = h
        .recorder
        .start_recording(RecordingOptions::new(h.base_path("none")), Some(settings), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoDiskSpaceError);
    assert!(!h.recorder.is_active());
    assert!(h.events_of(EventKind::RecordingStarted).is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_manual_split_requires_split_options() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    let err = h.recorder.split_recording(None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveRecording);

    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("plain")), Some(settings), None)
        .await?;
    sleep(Duration::from_millis(500)).await;

    let err = h.recorder.split_recording(None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SplitRecordingDisabled);
    h.recorder.stop_recording(None).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_manual_split_rolls_over() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    let mut options = RecordingOptions::new(h.base_path("manual"));
    options.split = Some(SplitOptions {
        enable_manual: true,
        ..SplitOptions::default()
    });
    h.recorder.start_recording(options, Some(settings), None).await?;
    sleep(Duration::from_millis(1500)).await;

    let (listener, split) = split_listener();
    h.recorder.split_recording(Some(listener)).await?;
    let split = timeout(Duration::from_millis(100), split).await??;
    assert_eq!(split.split_count, 1);
    assert!(split.next_file_path.ends_with("manual_1.mp4"));
    assert!(split.duration >= 1400);

    sleep(Duration::from_millis(500)).await;
    let (listener, stopped) = stop_listener();
    h.recorder.stop_recording(Some(listener)).await?;
    let stopped = stopped.await?;
    assert_eq!(stopped.split_count, Some(1));
    assert!(probe(h.dir.path().join("manual_1.mp4"))?.is_playable());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lost_display_ends_with_error() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;
    h.backend.lose_after(
        format!("display:{}", SYNTHETIC_PRIMARY_MONITOR),
        45,
        RecorderError::encoder("Display disconnected"),
    );

    let (listener, stopped) = stop_listener();
    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("lost")), Some(settings), Some(listener))
        .await?;
    let stopped = timeout(Duration::from_secs(10), stopped).await??;

    assert_eq!(stopped.base.reason, Some(ErrorCode::SuccessWithError));
    assert!(stopped.has_error);
    assert!(stopped.base.error.is_some());
    assert!(probe(h.dir.path().join("lost.mp4"))?.is_playable());
    assert!(!h.recorder.is_active());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_split_fails_fast_when_capture_dies() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;
    h.backend.lose_after(
        format!("display:{}", SYNTHETIC_PRIMARY_MONITOR),
        45,
        RecorderError::encoder("Display disconnected"),
    );

    let mut options = RecordingOptions::new(h.base_path("dying"));
    options.split = Some(SplitOptions {
        enable_manual: true,
        ..SplitOptions::default()
    });
    let (listener, stopped) = stop_listener();
    h.recorder.start_recording(options, Some(settings), Some(listener)).await?;

    // The display goes away on the very next frame
    sleep(Duration::from_millis(1480)).await;
    let asked = Instant::now();
    let err = h.recorder.split_recording(None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::EncoderError);
    assert!(asked.elapsed() < Duration::from_secs(1), "split took {:?}", asked.elapsed());

    let stopped = timeout(Duration::from_secs(5), stopped).await??;
    assert_eq!(stopped.base.reason, Some(ErrorCode::SuccessWithError));
    assert!(h.events_of(EventKind::RecordingSplit).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_start_uses_last_built_settings() -> Result<()> {
    let h = Harness::new()?;

    let err = h
        .recorder
        .start_recording(RecordingOptions::new(h.base_path("nothing")), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingOrInvalidParameters);

    h.settings().await?;
    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("built")), None, None)
        .await?;
    h.recorder.stop_recording(None).await?;
    assert_eq!(
        h.event_names(),
        vec!["recording-started", "recording-stopped"]
    );
    Ok(())
}

#[tokio::test]
async fn test_bad_output_path() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;

    let err = h
        .recorder
        .start_recording(RecordingOptions::new(""), Some(settings.clone()), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BadPathError);

    // A regular file where the output folder should be
    let blocker = h.dir.path().join("blocker");
    std::fs::write(&blocker, b"x")?;
    let base = Path::new(&blocker).join("clip").display().to_string();
    let err = h
        .recorder
        .start_recording(RecordingOptions::new(base), Some(settings), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BadPathError);
    assert!(!h.recorder.is_active());
    Ok(())
}
