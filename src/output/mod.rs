//! Output files: the packet container and the splitting recording writer

pub mod container;
mod writer;

pub use container::{probe, ContainerHeader, ContainerWriter, FileFormat, ProbeReport, SegmentInfo};
pub use writer::{
    segment_path, BatchOutcome, RecordingSummary, RecordingWriter, SplitInfo, SplitPolicy,
    SplitTrigger, WriterOptions,
};
