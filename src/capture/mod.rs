pub mod backend;
pub mod compositor;
pub mod file;
pub mod mixer;
pub mod pipeline;
pub mod synthetic;

pub use backend::{
    AudioFeed, AudioFrame, CaptureBackend, ChannelVideoFeed, ConnectOptions, FeedPoll, VideoFeed, VideoFrame,
};
pub use compositor::{place, Compositor, Placement};
pub use file::WavAudioFeed;
pub use mixer::{soft_clip, AudioMixer, MixInput, MixerConfig, TrackAudio};
pub use pipeline::{find_running_game, RawBatch, SourcePipeline};
pub use synthetic::{SourceScript, SyntheticBackend};
