// Audio mixer for combining device, application and microphone streams
//
// Every tick each audio feed contributes one block of samples. Blocks are
// conformed to the session layout (sample rate, channel count, block length),
// shaped by the per-device settings (volume, balance, mono), then summed per
// output track. Sums that leave the i16 range are soft clipped.

use tracing::debug;

use super::backend::AudioFrame;
use crate::settings::{AudioDeviceSettings, AudioTracks};

/// Magnitude above which the soft clipper starts compressing
const SOFT_CLIP_KNEE: f32 = 0.8 * i16::MAX as f32;

/// One conformed block from a single feed
#[derive(Debug, Clone)]
pub struct MixInput {
    pub tracks: AudioTracks,
    pub samples: Vec<i16>,
}

/// Mixed audio for one output track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAudio {
    /// 1-based track number
    pub track: u8,
    pub samples: Vec<i16>,
}

/// Configuration for the track mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Tracks present in the output file
    pub output_tracks: AudioTracks,
}

pub struct AudioMixer {
    config: MixerConfig,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        debug!(
            "Audio mixer initialized: {}Hz, {} channels, tracks {:#04x}",
            config.sample_rate, config.channels, config.output_tracks.0
        );
        Self { config }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    /// Bring a feed block to the session layout and `frames` sample frames,
    /// then apply the device settings
    pub fn prepare(&self, frame: &AudioFrame, frames: usize, settings: &AudioDeviceSettings) -> Vec<i16> {
        let remapped = remap_channels(&frame.samples, frame.channels, self.config.channels);
        let mut samples = resample(&remapped, self.config.channels, frames);
        apply_device_settings(&mut samples, self.config.channels, settings);
        samples
    }

    /// Sum inputs per output track. Every output track gets a block, silent
    /// when no input feeds it
    pub fn mix(&self, inputs: &[MixInput], frames: usize) -> Vec<TrackAudio> {
        let len = frames * self.config.channels as usize;

        self.config
            .output_tracks
            .tracks()
            .map(|track| {
                let feeding: Vec<&MixInput> = inputs
                    .iter()
                    .filter(|input| input.tracks.contains_track(track))
                    .collect();
                TrackAudio {
                    track,
                    samples: mix_blocks(&feeding, len),
                }
            })
            .collect()
    }
}

/// Add blocks sample by sample, soft clipping the sum
fn mix_blocks(blocks: &[&MixInput], len: usize) -> Vec<i16> {
    let mut mixed = Vec::with_capacity(len);
    for i in 0..len {
        let mut sum: i32 = 0;
        for block in blocks {
            sum += block.samples.get(i).copied().unwrap_or(0) as i32;
        }
        mixed.push(soft_clip(sum));
    }
    mixed
}

/// Linear below the knee, tanh-compressed above it, never past i16 bounds
pub fn soft_clip(sum: i32) -> i16 {
    let magnitude = (sum as f32).abs();
    if magnitude <= SOFT_CLIP_KNEE {
        return sum as i16;
    }

    let headroom = i16::MAX as f32 - SOFT_CLIP_KNEE;
    let compressed = SOFT_CLIP_KNEE + headroom * ((magnitude - SOFT_CLIP_KNEE) / headroom).tanh();
    let clipped = compressed.min(i16::MAX as f32).copysign(sum as f32);
    clipped.round() as i16
}

/// Up/down-mix interleaved samples between channel counts
fn remap_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 {
        return samples.to_vec();
    }

    let (from, to) = (from as usize, to as usize);
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|s| *s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            // Keep the shared leading channels, silence the rest
            for ch in 0..to {
                out.push(frame.get(ch).copied().unwrap_or(0));
            }
        }
    }
    out
}

/// Stretch or squeeze interleaved samples to exactly `frames` sample frames
/// (linear interpolation)
fn resample(samples: &[i16], channels: u16, frames: usize) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    let in_frames = samples.len() / channels;
    if in_frames == frames {
        return samples[..frames * channels].to_vec();
    }
    if in_frames == 0 {
        return vec![0; frames * channels];
    }

    let mut out = Vec::with_capacity(frames * channels);
    let step = in_frames as f64 / frames as f64;
    for i in 0..frames {
        let pos = i as f64 * step;
        let idx = pos.floor() as usize;
        let next = (idx + 1).min(in_frames - 1);
        let frac = pos - idx as f64;
        for ch in 0..channels {
            let a = samples[idx * channels + ch] as f64;
            let b = samples[next * channels + ch] as f64;
            out.push((a + (b - a) * frac).round() as i16);
        }
    }
    out
}

/// Volume, balance and mono downmix
fn apply_device_settings(samples: &mut [i16], channels: u16, settings: &AudioDeviceSettings) {
    let channels = channels.max(1) as usize;

    if settings.mono && channels > 1 {
        for frame in samples.chunks_exact_mut(channels) {
            let avg = frame.iter().map(|s| *s as i32).sum::<i32>() / channels as i32;
            frame.fill(avg as i16);
        }
    }

    // Balance 0.5 leaves both sides untouched
    let left_gain = (2.0 * (1.0 - settings.balance)).min(1.0);
    let right_gain = (2.0 * settings.balance).min(1.0);

    for frame in samples.chunks_exact_mut(channels) {
        for (ch, sample) in frame.iter_mut().enumerate() {
            let mut gain = settings.volume;
            if channels == 2 {
                gain *= if ch == 0 { left_gain } else { right_gain };
            }
            let scaled = (*sample as f32 * gain).round();
            *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
}
