use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::info;

use super::backend::{AudioFeed, AudioFrame, FeedPoll};

/// Audio feed that plays a WAV file, looping at the end
///
/// Used to drive sessions with deterministic, real-world audio.
pub struct WavAudioFeed {
    name: String,
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
    position: usize,
    delivered_frames: u64,
}

impl WavAudioFeed {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            anyhow::bail!(
                "Unsupported WAV format in {}: expected 16-bit PCM, got {}-bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;
        if samples.is_empty() {
            anyhow::bail!("WAV file {} has no samples", path.display());
        }

        info!(
            "WAV feed loaded: {} ({:.1}s, {}Hz, {} channels)",
            path.display(),
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64),
            spec.sample_rate,
            spec.channels
        );

        Ok(Self {
            name: path.display().to_string(),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
            position: 0,
            delivered_frames: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioFeed for WavAudioFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, frames: usize, sample_rate: u32) -> FeedPoll<AudioFrame> {
        // Same duration, expressed in the file's own rate
        let native_frames = (frames as u64 * self.sample_rate as u64 / sample_rate.max(1) as u64) as usize;
        let wanted = native_frames * self.channels as usize;

        let mut samples = Vec::with_capacity(wanted);
        while samples.len() < wanted {
            let take = (wanted - samples.len()).min(self.samples.len() - self.position);
            samples.extend_from_slice(&self.samples[self.position..self.position + take]);
            self.position = (self.position + take) % self.samples.len();
        }

        let timestamp_ms = self.delivered_frames * 1000 / self.sample_rate as u64;
        self.delivered_frames += native_frames as u64;

        FeedPoll::Ready(AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_reads_in_native_rate_and_loops() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 16000, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut feed = WavAudioFeed::open(&path).unwrap();
        assert_eq!(feed.sample_rate(), 16000);
        assert_eq!(feed.channels(), 1);

        // 18 frames at 48kHz = 6 frames at 16kHz
        match feed.read(18, 48000) {
            FeedPoll::Ready(frame) => assert_eq!(frame.samples, vec![1, 2, 3, 4, 5, 6]),
            other => panic!("unexpected {:?}", other),
        }
        match feed.read(18, 48000) {
            FeedPoll::Ready(frame) => {
                assert_eq!(frame.samples, vec![7, 8, 1, 2, 3, 4]);
                assert_eq!(frame.timestamp_ms, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(WavAudioFeed::open(dir.path().join("missing.wav")).is_err());
    }
}
