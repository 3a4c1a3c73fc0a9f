// Recording writer with keyframe aligned splitting
//
// Files are opened lazily on the first packet, so a session stopped before
// its first frame leaves nothing on disk. Rollover only happens on a video
// keyframe: the closed file ends right before it and the next file starts
// with it, so every segment is independently decodable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::container::{ContainerHeader, ContainerWriter, SegmentInfo};
use crate::encoder::EncodedPacket;
use crate::error::{RecorderError, RecorderResult};
use crate::host::HostProbe;

/// Free space is checked once per this much recorded media time
const DISK_CHECK_INTERVAL_MS: u64 = 1000;

/// Automatic split thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitPolicy {
    pub max_time_ms: Option<u64>,
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitTrigger {
    Time,
    Size,
    Manual,
}

/// A completed rollover
#[derive(Debug, Clone, PartialEq)]
pub struct SplitInfo {
    pub closed: SegmentInfo,
    /// Splits so far in this session, this one included
    pub split_count: u32,
    pub next_file_path: PathBuf,
    /// Wall clock start of the closed segment, ms since the Unix epoch
    pub start_time_epoch_ms: i64,
    pub trigger: SplitTrigger,
}

/// What happened while writing one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub split: Option<SplitInfo>,
    /// Free space fell under the low-water mark; the file was finalized
    /// and nothing more will be written
    pub low_disk: bool,
}

#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub segments: Vec<SegmentInfo>,
    pub split_count: u32,
    pub duration_ms: u64,
}

impl RecordingSummary {
    pub fn last_path(&self) -> Option<&Path> {
        self.segments.last().map(|s| s.path.as_path())
    }
}

pub struct WriterOptions {
    /// Output path without extension
    pub base_path: PathBuf,
    pub header: ContainerHeader,
    pub split: SplitPolicy,
    pub low_disk_bytes: u64,
    pub start_time_epoch_ms: i64,
}

/// `{base}.{ext}` for the first file, `{base}_{n}.{ext}` after the n-th split
pub fn segment_path(base: &Path, extension: &str, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    if index > 0 {
        name.push(format!("_{}", index));
    }
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

pub struct RecordingWriter {
    options: WriterOptions,
    probe: Arc<dyn HostProbe>,
    current: Option<ContainerWriter>,
    segments: Vec<SegmentInfo>,
    segment_index: u32,
    manual_split: bool,
    next_disk_check_pts: u64,
    stopped: bool,
}

impl RecordingWriter {
    pub fn new(options: WriterOptions, probe: Arc<dyn HostProbe>) -> Self {
        Self {
            options,
            probe,
            current: None,
            segments: Vec::new(),
            segment_index: 0,
            manual_split: false,
            next_disk_check_pts: 0,
            stopped: false,
        }
    }

    /// Path of the file being written, or of the next one to be opened
    pub fn current_path(&self) -> PathBuf {
        segment_path(
            &self.options.base_path,
            self.options.header.format.extension(),
            self.segment_index,
        )
    }

    pub fn split_count(&self) -> u32 {
        self.segments.len() as u32
    }

    /// Split at the next video keyframe
    pub fn request_split(&mut self) -> RecorderResult<()> {
        if self.current.is_none() {
            return Err(RecorderError::invalid(
                "Nothing has been recorded yet, there is nothing to split",
            ));
        }
        self.manual_split = true;
        Ok(())
    }

    fn split_trigger(&self, packet: &EncodedPacket) -> Option<SplitTrigger> {
        let current = self.current.as_ref()?;
        if !packet.is_video() || !packet.keyframe {
            return None;
        }

        let elapsed = current
            .first_pts_ms()
            .map(|first| packet.pts_ms.saturating_sub(first))
            .unwrap_or(0);
        if self.options.split.max_time_ms.is_some_and(|max| elapsed >= max) {
            return Some(SplitTrigger::Time);
        }
        if self
            .options
            .split
            .max_bytes
            .is_some_and(|max| current.bytes_written() >= max)
        {
            return Some(SplitTrigger::Size);
        }
        self.manual_split.then_some(SplitTrigger::Manual)
    }

    fn open_next(&mut self) -> RecorderResult<()> {
        let path = self.current_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RecorderError::from_output_io(&e, &format!("Failed to create {}", parent.display()))
            })?;
        }
        let mut header = self.options.header.clone();
        header.created_at_ms = chrono::Utc::now().timestamp_millis();
        self.current = Some(ContainerWriter::create(&path, &header)?);
        Ok(())
    }

    fn roll_over(&mut self, trigger: SplitTrigger) -> RecorderResult<SplitInfo> {
        let Some(writer) = self.current.take() else {
            return Err(RecorderError::encoder("No open file to split"));
        };
        let closed = writer.finish()?;
        self.segment_index += 1;
        self.segments.push(closed.clone());

        let info = SplitInfo {
            start_time_epoch_ms: self.options.start_time_epoch_ms + closed.first_pts_ms as i64,
            closed,
            split_count: self.split_count(),
            next_file_path: self.current_path(),
            trigger,
        };
        info!(
            "Recording split ({:?}) #{}: {} ({}ms), next {}",
            trigger,
            info.split_count,
            info.closed.path.display(),
            info.closed.duration_ms,
            info.next_file_path.display()
        );

        self.manual_split = false;
        Ok(info)
    }

    fn disk_is_low(&mut self, pts_ms: u64) -> bool {
        if pts_ms < self.next_disk_check_pts {
            return false;
        }
        self.next_disk_check_pts = pts_ms + DISK_CHECK_INTERVAL_MS;

        let path = self.current_path();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        match self.probe.available_space(dir) {
            Some(free) if free < self.options.low_disk_bytes => {
                warn!(
                    "Free disk space {}MB is under the {}MB low-water mark",
                    free / (1024 * 1024),
                    self.options.low_disk_bytes / (1024 * 1024)
                );
                true
            }
            _ => false,
        }
    }

    /// Write the packets of one batch
    pub fn write_batch(&mut self, packets: &[EncodedPacket]) -> RecorderResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if self.stopped {
            return Ok(outcome);
        }

        if let Some(first) = packets.first() {
            if self.disk_is_low(first.pts_ms) {
                self.stopped = true;
                outcome.low_disk = true;
                if let Some(writer) = self.current.take() {
                    self.segments.push(writer.finish()?);
                }
                return Ok(outcome);
            }
        }

        for packet in packets {
            if let Some(trigger) = self.split_trigger(packet) {
                outcome.split = Some(self.roll_over(trigger)?);
            }

            if self.current.is_none() {
                // A file must start on a video keyframe
                if !(packet.is_video() && packet.keyframe) {
                    continue;
                }
                self.open_next()?;
            }
            if let Some(writer) = self.current.as_mut() {
                writer.write_packet(packet)?;
            }
        }

        Ok(outcome)
    }

    /// Finalize the open file
    pub fn finish(mut self) -> RecorderResult<RecordingSummary> {
        if let Some(writer) = self.current.take() {
            self.segments.push(writer.finish()?);
        }

        let split_count = self.segments.len().saturating_sub(1) as u32;
        let duration_ms = self.segments.iter().map(|s| s.duration_ms).sum();
        info!(
            "Recording finished: {} file(s), {} split(s), {}ms",
            self.segments.len(),
            split_count,
            duration_ms
        );

        Ok(RecordingSummary {
            segments: std::mem::take(&mut self.segments),
            split_count,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ProcessUsage;
    use crate::output::container::{probe, FileFormat};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    struct FakeProbe {
        free: AtomicU64,
    }

    impl HostProbe for FakeProbe {
        fn available_space(&self, _path: &Path) -> Option<u64> {
            Some(self.free.load(Ordering::SeqCst))
        }

        fn process_usage(&self) -> ProcessUsage {
            ProcessUsage::default()
        }
    }

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

    fn writer(dir: &TempDir, split: SplitPolicy) -> (RecordingWriter, Arc<FakeProbe>) {
        let probe = Arc::new(FakeProbe {
            free: AtomicU64::new(u64::MAX),
        });
        let writer = RecordingWriter::new(
            WriterOptions {
                base_path: dir.path().join("rec"),
                header: header(),
                split,
                low_disk_bytes: 50 * 1024 * 1024,
                start_time_epoch_ms: 1_000_000,
            },
            probe.clone(),
        );
        (writer, probe)
    }

    /// Ten frames per second with a keyframe every second
    fn batch(frame: u64) -> Vec<EncodedPacket> {
        let pts_ms = frame * 100;
        vec![
            EncodedPacket {
                track: 0,
                pts_ms,
                duration_ms: 100,
                keyframe: frame % 10 == 0,
                data: vec![0; 100],
            },
            EncodedPacket {
                track: 1,
                pts_ms,
                duration_ms: 100,
                keyframe: true,
                data: vec![1; 20],
            },
        ]
    }

    #[test]
    fn test_segment_paths() {
        let base = Path::new("/videos/match");
        assert_eq!(segment_path(base, "mp4", 0), PathBuf::from("/videos/match.mp4"));
        assert_eq!(segment_path(base, "mkv", 2), PathBuf::from("/videos/match_2.mkv"));
    }

    #[test]
    fn test_time_split_on_keyframes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut writer, _) = writer(&dir, SplitPolicy { max_time_ms: Some(2000), max_bytes: None });

        let mut splits = Vec::new();
        for frame in 0..50 {
            if let Some(split) = writer.write_batch(&batch(frame))?.split {
                splits.push(split);
            }
        }
        let summary = writer.finish()?;

        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].trigger, SplitTrigger::Time);
        assert_eq!(splits[0].closed.duration_ms, 2000);
        assert_eq!(splits[0].next_file_path, dir.path().join("rec_1.mp4"));
        assert_eq!(splits[1].split_count, 2);
        assert_eq!(splits[1].start_time_epoch_ms, 1_000_000 + 2000);

        assert_eq!(summary.split_count, 2);
        assert_eq!(summary.segments.len(), 3);
        assert_eq!(summary.segments[2].duration_ms, 1000);
        assert_eq!(summary.duration_ms, 5000);
        for segment in &summary.segments {
            assert!(probe(&segment.path)?.is_playable());
        }
        Ok(())
    }

    #[test]
    fn test_time_wins_tie_with_size() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut writer, _) = writer(&dir, SplitPolicy { max_time_ms: Some(1000), max_bytes: Some(1) });

        for frame in 0..10 {
            assert!(writer.write_batch(&batch(frame))?.split.is_none());
        }
        let split = writer.write_batch(&batch(10))?.split.unwrap();
        assert_eq!(split.trigger, SplitTrigger::Time);
        Ok(())
    }

    #[test]
    fn test_size_split_waits_for_keyframe() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut writer, _) = writer(&dir, SplitPolicy { max_time_ms: None, max_bytes: Some(500) });

        for frame in 0..10 {
            assert!(writer.write_batch(&batch(frame))?.split.is_none());
        }
        let split = writer.write_batch(&batch(10))?.split.unwrap();
        assert_eq!(split.trigger, SplitTrigger::Size);
        Ok(())
    }

    #[test]
    fn test_manual_split_waits_for_keyframe() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut writer, _) = writer(&dir, SplitPolicy::default());

        assert!(writer.request_split().is_err());

        writer.write_batch(&batch(0))?;
        writer.request_split()?;
        assert!(writer.write_batch(&batch(1))?.split.is_none());

        let info = writer.write_batch(&batch(10))?.split.unwrap();
        assert_eq!(info.trigger, SplitTrigger::Manual);
        assert_eq!(info.split_count, 1);
        Ok(())
    }

    #[test]
    fn test_low_disk_stops_writing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut writer, host) = writer(&dir, SplitPolicy::default());

        for frame in 0..15 {
            assert!(!writer.write_batch(&batch(frame))?.low_disk);
        }
        host.free.store(1024, Ordering::SeqCst);
        let mut stopped_at = None;
        for frame in 15..30 {
            if writer.write_batch(&batch(frame))?.low_disk {
                stopped_at = Some(frame);
                break;
            }
        }
        assert_eq!(stopped_at, Some(20));

        let summary = writer.finish()?;
        assert_eq!(summary.segments.len(), 1);
        assert!(probe(&summary.segments[0].path)?.is_playable());
        Ok(())
    }

    #[test]
    fn test_no_packets_no_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (writer, _) = writer(&dir, SplitPolicy::default());
        let summary = writer.finish()?;
        assert!(summary.segments.is_empty());
        assert!(!dir.path().join("rec.mp4").exists());
        Ok(())
    }
}
