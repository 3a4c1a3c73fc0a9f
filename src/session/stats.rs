use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time recorder statistics, emitted on the `stats` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStats {
    /// Current CPU usage in percent
    pub cpu_usage: f32,

    /// Memory used by the recorder process, in MB
    pub memory_usage: f64,

    /// Free space where output is written, in MB
    pub available_disk_space: f64,

    /// Frames rendered per second since the previous snapshot
    pub active_fps: f64,

    /// Average time to render (composite + mix) one frame, in milliseconds
    pub average_frame_render_time: f64,

    pub render_skipped_frames: u64,
    pub render_total_frames: u64,
    pub output_skipped_frames: u64,
    pub output_total_frames: u64,
}

/// Frame counters shared by the pipeline and encoder tasks
#[derive(Debug, Default)]
pub struct FrameCounters {
    render_total: AtomicU64,
    render_skipped: AtomicU64,
    render_time_us: AtomicU64,
    output_total: AtomicU64,
    output_skipped: AtomicU64,
}

impl FrameCounters {
    pub fn frame_rendered(&self, render_time_us: u64) {
        self.render_total.fetch_add(1, Ordering::Relaxed);
        self.render_time_us.fetch_add(render_time_us, Ordering::Relaxed);
    }

    pub fn render_skipped(&self, frames: u64) {
        self.render_skipped.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn frame_output(&self) {
        self.output_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn output_skipped(&self) {
        self.output_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_total(&self) -> u64 {
        self.render_total.load(Ordering::Relaxed)
    }

    pub fn output_skipped_total(&self) -> u64 {
        self.output_skipped.load(Ordering::Relaxed)
    }

    /// Fill the frame related fields of `stats`
    pub fn fill(&self, stats: &mut RecorderStats) {
        let rendered = self.render_total.load(Ordering::Relaxed);
        stats.render_total_frames = rendered;
        stats.render_skipped_frames = self.render_skipped.load(Ordering::Relaxed);
        stats.output_total_frames = self.output_total.load(Ordering::Relaxed);
        stats.output_skipped_frames = self.output_skipped.load(Ordering::Relaxed);
        stats.average_frame_render_time = if rendered == 0 {
            0.0
        } else {
            self.render_time_us.load(Ordering::Relaxed) as f64 / rendered as f64 / 1000.0
        };
    }
}
