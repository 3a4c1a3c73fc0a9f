// Replay capture task
//
// Writes the buffered past of the session into a file, then keeps following
// the buffer until the timeout passes or the capture is stopped. The buffer
// is only ever read.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ring::{ReplayBuffer, ReplaySlice};
use crate::error::{RecorderError, RecorderResult};
use crate::output::{ContainerHeader, ContainerWriter, SegmentInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayControl {
    Stop,
    StopAfter(u64),
    /// The session is going away; finish with what was written
    Abort,
}

pub(crate) struct ReplayRequest {
    pub id: u64,
    pub path: PathBuf,
    pub past_ms: u64,
    pub timeout_ms: Option<u64>,
    pub header: ContainerHeader,
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub(crate) struct ReplayOutcome {
    pub id: u64,
    pub path: PathBuf,
    pub result: RecorderResult<SegmentInfo>,
    pub aborted: bool,
}

/// Callback invoked once a replay file is complete
pub type ReplayCallback = Box<dyn FnOnce(&crate::session::ReplayVideo) + Send>;

pub(crate) type CallbackSlot = Arc<Mutex<Option<ReplayCallback>>>;

/// Handle to an in-flight replay capture
pub struct ActiveReplay {
    id: u64,
    timeout: Arc<Mutex<Option<u64>>>,
    control: mpsc::UnboundedSender<ReplayControl>,
    callback: CallbackSlot,
}

impl ActiveReplay {
    pub(crate) fn new(
        id: u64,
        timeout: Option<u64>,
        control: mpsc::UnboundedSender<ReplayControl>,
        callback: CallbackSlot,
    ) -> Self {
        Self {
            id,
            timeout: Arc::new(Mutex::new(timeout)),
            control,
            callback,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current forward capture timeout in milliseconds, if one is set
    pub fn timeout(&self) -> Option<u64> {
        *self.timeout.lock()
    }

    fn set_callback(&self, callback: Option<ReplayCallback>) {
        if let Some(callback) = callback {
            *self.callback.lock() = Some(callback);
        }
    }

    /// Stop now. `callback` replaces the one given at capture time
    pub fn stop(&self, callback: Option<ReplayCallback>) {
        self.set_callback(callback);
        if self.control.send(ReplayControl::Stop).is_err() {
            debug!("Replay {} already finished", self.id);
        }
    }

    /// Stop `timeout_ms` from now
    pub fn stop_after(&self, timeout_ms: u64, callback: Option<ReplayCallback>) {
        self.set_callback(callback);
        *self.timeout.lock() = Some(timeout_ms);
        if self.control.send(ReplayControl::StopAfter(timeout_ms)).is_err() {
            debug!("Replay {} already finished", self.id);
        }
    }
}

impl std::fmt::Debug for ActiveReplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveReplay")
            .field("id", &self.id)
            .field("timeout", &self.timeout())
            .finish()
    }
}

/// Container writer that only starts once a video keyframe shows up
struct ReplayFile {
    path: PathBuf,
    header: ContainerHeader,
    writer: Option<ContainerWriter>,
}

impl ReplayFile {
    fn write(&mut self, slice: &ReplaySlice) -> RecorderResult<()> {
        for packet in &slice.packets {
            if self.writer.is_none() {
                if !(packet.is_video() && packet.keyframe) {
                    continue;
                }
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RecorderError::from_output_io(&e, "Failed to create replay folder")
                    })?;
                }
                let mut header = self.header.clone();
                header.created_at_ms = chrono::Utc::now().timestamp_millis();
                self.writer = Some(ContainerWriter::create(&self.path, &header)?);
            }
            if let Some(writer) = self.writer.as_mut() {
                writer.write_packet(packet)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> RecorderResult<SegmentInfo> {
        match self.writer {
            Some(writer) => writer.finish(),
            None => Err(RecorderError::encoder(
                "Replay buffer holds no video keyframe yet",
            )),
        }
    }
}

pub(crate) fn spawn_capture<F>(
    ring: Arc<ReplayBuffer>,
    request: ReplayRequest,
    mut control: mpsc::UnboundedReceiver<ReplayControl>,
    on_done: F,
) -> JoinHandle<()>
where
    F: FnOnce(ReplayOutcome) + Send + 'static,
{
    tokio::spawn(async move {
        let mut file = ReplayFile {
            path: request.path.clone(),
            header: request.header.clone(),
            writer: None,
        };
        let mut aborted = false;

        let snapshot = ring.snapshot(request.past_ms);
        let mut next_seq = snapshot.next_seq;
        let mut result = file.write(&snapshot);
        debug!(
            "Replay {}: {} buffered packets for {}ms of past",
            request.id,
            snapshot.packets.len(),
            request.past_ms
        );

        let mut deadline = request
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        if result.is_ok() && request.timeout_ms != Some(0) {
            let mut poll = time::interval(request.poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
                tokio::select! {
                    biased;
                    msg = control.recv() => match msg {
                        Some(ReplayControl::StopAfter(ms)) => {
                            deadline = Some(Instant::now() + Duration::from_millis(ms));
                        }
                        Some(ReplayControl::Abort) => {
                            aborted = true;
                            break;
                        }
                        Some(ReplayControl::Stop) | None => break,
                    },
                    _ = time::sleep_until(sleep_until), if deadline.is_some() => break,
                    _ = poll.tick() => {
                        let slice = ring.packets_since(next_seq);
                        next_seq = slice.next_seq;
                        if let Err(err) = file.write(&slice) {
                            result = Err(err);
                            break;
                        }
                    }
                }
            }

            if result.is_ok() {
                let slice = ring.packets_since(next_seq);
                result = file.write(&slice);
            }
        }

        let result = result.and_then(|_| file.finish());
        match &result {
            Ok(segment) => info!(
                "Replay {} captured: {} ({}ms{})",
                request.id,
                segment.path.display(),
                segment.duration_ms,
                if aborted { ", cut short" } else { "" }
            ),
            Err(err) => warn!("Replay {} failed: {}", request.id, err),
        }

        on_done(ReplayOutcome {
            id: request.id,
            path: request.path,
            result,
            aborted,
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodedPacket;
    use crate::output::{probe, FileFormat};
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn header() -> ContainerHeader {
        ContainerHeader {
            format: FileFormat::FragmentedMp4,
            width: 16,
            height: 16,
            fps: 10,
            video_encoder: "obs_x264".to_string(),
            audio_encoder: "ffmpeg_aac".to_string(),
            audio_tracks: vec![1],
            sample_rate: 48000,
            channels: 2,
            created_at_ms: 0,
        }
    }

    fn video(frame: u64) -> Vec<EncodedPacket> {
        vec![EncodedPacket {
            track: 0,
            pts_ms: frame * 100,
            duration_ms: 100,
            keyframe: frame % 10 == 0,
            data: vec![0; 16],
        }]
    }

    fn request(dir: &TempDir, timeout_ms: Option<u64>) -> ReplayRequest {
        ReplayRequest {
            id: 1,
            path: dir.path().join("replay.mp4"),
            past_ms: 5000,
            timeout_ms,
            header: header(),
            poll_interval: Duration::from_millis(100),
        }
    }

    fn start(
        ring: &Arc<ReplayBuffer>,
        request: ReplayRequest,
    ) -> (mpsc::UnboundedSender<ReplayControl>, oneshot::Receiver<ReplayOutcome>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        spawn_capture(Arc::clone(ring), request, control_rx, move |outcome| {
            let _ = done_tx.send(outcome);
        });
        (control_tx, done_rx)
    }

    #[tokio::test]
    async fn test_zero_timeout_writes_past_only() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let ring = Arc::new(ReplayBuffer::new(30_000));
        for frame in 0..100 {
            ring.push_batch(video(frame));
        }

        let (_control, done) = start(&ring, request(&dir, Some(0)));
        let outcome = done.await?;
        let segment = outcome.result?;
        assert_eq!(segment.duration_ms, 5000);
        assert!(probe(&segment.path)?.is_playable());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_capture_until_stopped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let ring = Arc::new(ReplayBuffer::new(30_000));
        for frame in 0..50 {
            ring.push_batch(video(frame));
        }

        let (control, done) = start(&ring, request(&dir, None));
        for frame in 50..70 {
            time::sleep(Duration::from_millis(100)).await;
            ring.push_batch(video(frame));
        }
        control.send(ReplayControl::Stop)?;

        let segment = done.await?.result?;
        assert_eq!(segment.first_pts_ms, 0);
        assert_eq!(segment.end_pts_ms, 7000);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_marks_outcome() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let ring = Arc::new(ReplayBuffer::new(30_000));
        for frame in 0..20 {
            ring.push_batch(video(frame));
        }

        let (control, done) = start(&ring, request(&dir, Some(60_000)));
        control.send(ReplayControl::Abort)?;
        let outcome = done.await?;
        assert!(outcome.aborted);
        assert!(outcome.result.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_no_keyframe_fails() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let ring = Arc::new(ReplayBuffer::new(30_000));

        let (_control, done) = start(&ring, request(&dir, Some(0)));
        assert!(done.await?.result.is_err());
        assert!(!dir.path().join("replay.mp4").exists());
        Ok(())
    }
}
