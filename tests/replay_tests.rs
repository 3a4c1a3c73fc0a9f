// Integration tests for replay sessions
//
// These tests verify the rolling replay buffer and replay captures: how
// much past ends up in a clip, forward capture until a timeout or an
// explicit stop, and what happens when replays stop mid-capture.

mod common;

use anyhow::Result;
use common::{replay_listener, Harness, MB};
use replay_recorder::output::probe;
use replay_recorder::{
    CaptureReplayOptions, ErrorCode, EventKind, RecorderEvent, RecordingOptions, ReplayOptions,
};
use tokio::time::{sleep, timeout, Duration};

fn capture(name: &str, past_duration: u64, timeout: Option<u64>) -> CaptureReplayOptions {
    CaptureReplayOptions {
        file_name: name.to_string(),
        past_duration,
        timeout,
    }
}

async fn start_replays(h: &Harness, buffer_second: u64) -> Result<()> {
    let settings = h.settings().await?;
    let folder = h.dir.path().join("replays").display().to_string();
    h.recorder
        .start_replays(ReplayOptions::new(buffer_second, folder), Some(settings))
        .await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_buffer_keeps_only_configured_window() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 30).await?;
    sleep(Duration::from_secs(45)).await;

    // Asking for more past than the buffer holds is clipped to the buffer
    let (callback, done) = replay_listener();
    h.recorder
        .capture_replay(capture("clipped", 60_000, Some(0)), Some(callback))
        .await?;
    let video = timeout(Duration::from_secs(1), done).await??;

    assert_eq!(video.base.reason, Some(ErrorCode::Success));
    assert!(
        (29_000..=30_000).contains(&video.duration),
        "replay lasted {}ms",
        video.duration
    );

    let path = h.dir.path().join("replays").join("clipped.mp4");
    assert_eq!(video.base.file_path.as_deref(), Some(path.display().to_string().as_str()));
    let report = probe(&path)?;
    assert!(report.is_playable());
    assert!(report.first_pts_ms >= 14_000);

    h.recorder.stop_replays().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_past_duration_selects_recent_video() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 30).await?;
    sleep(Duration::from_secs(20)).await;

    let (callback, done) = replay_listener();
    h.recorder
        .capture_replay(capture("recent", 5_000, Some(0)), Some(callback))
        .await?;
    let video = timeout(Duration::from_secs(1), done).await??;
    // Reaches back to the keyframe before the requested start
    assert!(
        (5_000..=6_000).contains(&video.duration),
        "replay lasted {}ms",
        video.duration
    );

    h.recorder.stop_replays().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_past_shorter_than_keyframe_interval() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 30).await?;
    sleep(Duration::from_millis(10_600)).await;

    let (callback, done) = replay_listener();
    h.recorder
        .capture_replay(capture("short", 400, Some(0)), Some(callback))
        .await?;
    let video = timeout(Duration::from_secs(1), done).await??;

    assert_eq!(video.base.reason, Some(ErrorCode::Success));
    assert!(
        (400..=1_400).contains(&video.duration),
        "replay lasted {}ms",
        video.duration
    );
    let report = probe(h.dir.path().join("replays").join("short.mp4"))?;
    assert!(report.is_playable());
    assert!(report.starts_with_keyframe);

    h.recorder.stop_replays().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_forward_capture_until_timeout() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 30).await?;
    sleep(Duration::from_secs(10)).await;

    let (callback, done) = replay_listener();
    let active = h
        .recorder
        .capture_replay(capture("forward", 2_000, Some(3_000)), Some(callback))
        .await?;
    assert_eq!(active.timeout(), Some(3_000));

    let video = timeout(Duration::from_secs(10), done).await??;
    assert!(
        (5_000..=6_500).contains(&video.duration),
        "replay lasted {}ms",
        video.duration
    );

    let captured = h.events_of(EventKind::ReplayCaptured);
    assert_eq!(captured.len(), 1);
    let json = captured[0].payload();
    assert_eq!(json["reason"], 0);
    assert!(json["filePath"].as_str().unwrap_or("").ends_with("forward.mp4"));
    assert!(json["startTimeEpoch"].as_i64().unwrap_or(0) > 0);

    h.recorder.stop_replays().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_replaces_callback() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 30).await?;
    sleep(Duration::from_secs(10)).await;

    let (original, original_done) = replay_listener();
    let active = h
        .recorder
        .capture_replay(capture("open-ended", 3_000, None), Some(original))
        .await?;
    assert_eq!(active.timeout(), None);

    sleep(Duration::from_millis(500)).await;
    let (replacement, done) = replay_listener();
    active.stop_after(2_000, Some(replacement));
    assert_eq!(active.timeout(), Some(2_000));

    let video = timeout(Duration::from_secs(10), done).await??;
    assert!(
        (5_000..=7_000).contains(&video.duration),
        "replay lasted {}ms",
        video.duration
    );
    assert!(original_done.await.is_err());

    h.recorder.stop_replays().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_one_capture_at_a_time() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 10).await?;
    sleep(Duration::from_secs(3)).await;

    let (callback, done) = replay_listener();
    let active = h
        .recorder
        .capture_replay(capture("first", 1_000, None), Some(callback))
        .await?;

    let err = h
        .recorder
        .capture_replay(capture("second", 1_000, Some(0)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyRunning);

    active.stop(None);
    let video = timeout(Duration::from_secs(5), done).await??;
    assert_eq!(video.base.reason, Some(ErrorCode::Success));

    // The slot is free again once the first capture reported
    h.recorder
        .capture_replay(capture("third", 1_000, Some(0)), None)
        .await?;

    h.recorder.stop_replays().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_replays_cuts_capture_short() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 30).await?;
    sleep(Duration::from_secs(5)).await;

    let (callback, done) = replay_listener();
    h.recorder
        .capture_replay(capture("partial", 2_000, Some(60_000)), Some(callback))
        .await?;
    sleep(Duration::from_secs(1)).await;
    h.recorder.stop_replays().await?;

    let video = done.await?;
    assert_eq!(video.base.reason, Some(ErrorCode::SuccessWithError));
    assert!(video.base.error.is_some());
    let path = video.base.file_path.clone().unwrap_or_default();
    assert!(probe(&path)?.is_playable());

    let names = h.event_names();
    assert_eq!(
        names,
        vec!["replays-started", "replay-captured", "replays-stopped"]
    );
    assert!(!h.recorder.is_active());
    Ok(())
}

#[tokio::test]
async fn test_capture_requires_replay_session() -> Result<()> {
    let h = Harness::new()?;

    let err = h
        .recorder
        .capture_replay(capture("idle", 1_000, Some(0)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveRecording);

    let err = h.recorder.stop_replays().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveRecording);

    let settings = h.settings().await?;
    h.recorder
        .start_recording(RecordingOptions::new(h.base_path("rec")), Some(settings), None)
        .await?;
    let err = h
        .recorder
        .capture_replay(capture("during-recording", 1_000, Some(0)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveRecording);

    // Recording and replays are mutually exclusive
    let folder = h.dir.path().display().to_string();
    let err = h
        .recorder
        .start_replays(ReplayOptions::new(30, folder), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyRunning);

    h.recorder.stop_recording(None).await?;
    Ok(())
}

#[tokio::test]
async fn test_zero_buffer_is_rejected() -> Result<()> {
    let h = Harness::new()?;
    let settings = h.settings().await?;
    let folder = h.dir.path().display().to_string();

    let err = h
        .recorder
        .start_replays(ReplayOptions::new(0, folder), Some(settings))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingOrInvalidParameters);
    assert!(!h.recorder.is_active());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_replays_stopped_payload() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 5).await?;
    sleep(Duration::from_secs(1)).await;
    h.recorder.stop_replays().await?;

    match h.events_of(EventKind::ReplaysStopped).as_slice() {
        [RecorderEvent::ReplaysStopped(args)] => {
            assert_eq!(args.reason, Some(ErrorCode::Success));
            assert!(args.stats.as_ref().is_some_and(|s| s.render_total_frames > 0));
        }
        other => panic!("unexpected events {:?}", other),
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_low_disk_stops_replays() -> Result<()> {
    let h = Harness::new()?;
    start_replays(&h, 30).await?;
    sleep(Duration::from_secs(2)).await;
    assert!(h.recorder.is_active());

    h.host.set_free(MB);
    sleep(Duration::from_secs(3)).await;

    assert!(!h.recorder.is_active());
    match h.events_of(EventKind::ReplaysStopped).as_slice() {
        [RecorderEvent::ReplaysStopped(args)] => {
            assert_eq!(args.reason, Some(ErrorCode::SuccessLowDiskSpace));
        }
        other => panic!("unexpected events {:?}", other),
    }
    Ok(())
}
