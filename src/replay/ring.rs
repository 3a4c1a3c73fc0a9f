use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::encoder::EncodedPacket;

struct RingState {
    /// (sequence number, packet), oldest first
    packets: VecDeque<(u64, Arc<EncodedPacket>)>,
    next_seq: u64,
    newest_end_ms: u64,
}

/// Packets read out of the buffer at one instant
#[derive(Debug, Clone, Default)]
pub struct ReplaySlice {
    pub packets: Vec<Arc<EncodedPacket>>,
    /// Sequence number of the first packet not included
    pub next_seq: u64,
}

/// Rolling window of encoded packets
///
/// Writers push whole batches under the write lock and readers copy under
/// the read lock, so a reader always sees complete batches.
pub struct ReplayBuffer {
    window_ms: u64,
    state: RwLock<RingState>,
}

impl ReplayBuffer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            state: RwLock::new(RingState {
                packets: VecDeque::new(),
                next_seq: 0,
                newest_end_ms: 0,
            }),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Append one batch and evict everything older than the window
    pub fn push_batch(&self, packets: Vec<EncodedPacket>) {
        let mut state = self.state.write();
        for packet in packets {
            state.newest_end_ms = state.newest_end_ms.max(packet.end_ms());
            let seq = state.next_seq;
            state.next_seq += 1;
            state.packets.push_back((seq, Arc::new(packet)));
        }

        let horizon = state.newest_end_ms.saturating_sub(self.window_ms);
        while state
            .packets
            .front()
            .is_some_and(|(_, packet)| packet.pts_ms < horizon)
        {
            state.packets.pop_front();
        }
    }

    /// The last `past_ms` of content (clipped to the window)
    ///
    /// Playback has to begin on a video keyframe, so the slice starts at the
    /// last retained keyframe at or before the requested start. When the
    /// buffer holds none that old, it starts at the oldest retained one.
    pub fn snapshot(&self, past_ms: u64) -> ReplaySlice {
        let state = self.state.read();
        let start = state
            .newest_end_ms
            .saturating_sub(past_ms.min(self.window_ms));

        let is_keyframe = |p: &EncodedPacket| p.is_video() && p.keyframe;
        let first = state
            .packets
            .iter()
            .rposition(|(_, p)| is_keyframe(p) && p.pts_ms <= start)
            .or_else(|| state.packets.iter().position(|(_, p)| is_keyframe(p)));

        ReplaySlice {
            packets: first
                .map(|index| {
                    state
                        .packets
                        .iter()
                        .skip(index)
                        .map(|(_, p)| Arc::clone(p))
                        .collect()
                })
                .unwrap_or_default(),
            next_seq: state.next_seq,
        }
    }

    /// Packets pushed since `seq` that are still retained
    pub fn packets_since(&self, seq: u64) -> ReplaySlice {
        let state = self.state.read();
        ReplaySlice {
            packets: state
                .packets
                .iter()
                .filter(|(s, _)| *s >= seq)
                .map(|(_, p)| Arc::clone(p))
                .collect(),
            next_seq: state.next_seq,
        }
    }

    /// Media time covered by the retained packets
    pub fn span_ms(&self) -> u64 {
        let state = self.state.read();
        state
            .packets
            .front()
            .map(|(_, p)| state.newest_end_ms - p.pts_ms)
            .unwrap_or(0)
    }

    pub fn oldest_pts_ms(&self) -> Option<u64> {
        self.state.read().packets.front().map(|(_, p)| p.pts_ms)
    }

    pub fn len(&self) -> usize {
        self.state.read().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 30fps video with a keyframe every second plus one audio packet
    fn batch(frame: u64) -> Vec<EncodedPacket> {
        let pts_ms = frame * 1000 / 30;
        let duration_ms = (frame + 1) * 1000 / 30 - pts_ms;
        vec![
            EncodedPacket {
                track: 0,
                pts_ms,
                duration_ms,
                keyframe: frame % 30 == 0,
                data: vec![0; 8],
            },
            EncodedPacket {
                track: 1,
                pts_ms,
                duration_ms,
                keyframe: true,
                data: vec![1; 4],
            },
        ]
    }

    fn filled(seconds: u64, window_ms: u64) -> ReplayBuffer {
        let ring = ReplayBuffer::new(window_ms);
        for frame in 0..seconds * 30 {
            ring.push_batch(batch(frame));
        }
        ring
    }

    #[test]
    fn test_eviction_keeps_window() {
        let ring = filled(45, 30_000);
        assert_eq!(ring.span_ms(), 30_000);
        assert_eq!(ring.oldest_pts_ms(), Some(15_000));
    }

    #[test]
    fn test_snapshot_starts_on_keyframe() {
        let ring = filled(10, 30_000);
        let slice = ring.snapshot(2500);
        let first = &slice.packets[0];
        assert!(first.is_video() && first.keyframe);
        assert_eq!(first.pts_ms, 7000);
        assert_eq!(slice.packets.last().map(|p| p.end_ms()), Some(10_000));
    }

    #[test]
    fn test_short_past_reaches_back_to_keyframe() {
        let ring = filled(10, 30_000);
        let slice = ring.snapshot(400);
        assert_eq!(slice.packets[0].pts_ms, 9000);
        assert!(slice.packets[0].keyframe);

        // Exactly on a keyframe
        let slice = ring.snapshot(1000);
        assert_eq!(slice.packets[0].pts_ms, 9000);
    }

    #[test]
    fn test_falls_back_to_oldest_keyframe() {
        let ring = ReplayBuffer::new(30_000);
        // Audio only for the first half second, video keyframe after it
        for frame in 0..15 {
            ring.push_batch(vec![batch(frame)[1].clone()]);
        }
        ring.push_batch(batch(30));
        let slice = ring.snapshot(5000);
        assert_eq!(slice.packets[0].pts_ms, 1000);
        assert!(slice.packets[0].is_video());
    }

    #[test]
    fn test_past_duration_clipped_to_window() {
        let ring = filled(45, 30_000);
        let slice = ring.snapshot(120_000);
        assert_eq!(slice.packets[0].pts_ms, 15_000);
        assert_eq!(slice.packets.len(), ring.len());
    }

    #[test]
    fn test_packets_since_sequence() {
        let ring = filled(1, 30_000);
        let slice = ring.snapshot(1000);
        assert_eq!(slice.next_seq, 60);

        ring.push_batch(batch(30));
        let newer = ring.packets_since(slice.next_seq);
        assert_eq!(newer.packets.len(), 2);
        assert_eq!(newer.next_seq, 62);
        assert!(ring.packets_since(newer.next_seq).packets.is_empty());
    }

    #[test]
    fn test_empty_buffer() {
        let ring = ReplayBuffer::new(1000);
        assert!(ring.snapshot(1000).packets.is_empty());
        assert_eq!(ring.span_ms(), 0);
        assert!(ring.is_empty());
    }
}
