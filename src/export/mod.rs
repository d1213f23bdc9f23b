//! Replay export module
//!
//! This module writes a snapshot of the replay buffer to a fast-start MP4
//! through a container muxer, normalizing and rescaling timestamps on the
//! way.

pub mod ffmpeg;
pub mod mp4;
pub mod mpegts;
pub mod muxer;
pub mod normalize;
pub mod pipeline;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use ffmpeg::FfmpegMuxerFactory;
pub use muxer::{ContainerMuxer, MuxerFactory, StreamInfo};
pub use normalize::{normalize_timestamps, TimestampOffsets, UnknownTimestampPolicy};
pub use pipeline::ExportPipeline;
pub use types::{
    ExportError, ExportOptions, ExportReport, ExportStage, FailedFilePolicy, MuxError, MuxStep,
    OutputFormat,
};
