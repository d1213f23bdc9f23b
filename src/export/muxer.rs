//! Container muxer interface
//!
//! The export pipeline drives a muxer through a fixed sequence: open,
//! add one stream, header, packets, trailer, close. Implementations own
//! their file handles and helper processes and must release them when
//! dropped, so an export that bails out early still cleans up.

use super::types::{MuxError, OutputFormat};
use crate::encoder::CodecParameters;
use crate::packet::{EncodedPacket, Rational};
use std::path::Path;

/// Stream registered with a muxer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream index within the container
    pub index: usize,
    /// Time-base the muxer expects packet timestamps in.
    ///
    /// May differ from the encoder's.
    pub time_base: Rational,
}

/// A container writer for one output file
pub trait ContainerMuxer: Send {
    /// Register the output stream, mirroring the encoder's parameters
    fn add_stream(&mut self, params: &CodecParameters) -> Result<StreamInfo, MuxError>;

    /// Write the container header
    fn write_header(&mut self) -> Result<(), MuxError>;

    /// Write one packet whose timestamps are in `stream.time_base`
    fn write_packet(&mut self, stream: &StreamInfo, packet: &EncodedPacket)
        -> Result<(), MuxError>;

    /// Finalize the container (index relocation for fast-start happens here)
    fn write_trailer(&mut self) -> Result<(), MuxError>;

    /// Release the writer after a successful trailer
    fn close(self: Box<Self>) -> Result<(), MuxError>;
}

/// Allocates a muxer for a named format backed by a file
pub trait MuxerFactory: Send + Sync {
    fn open(
        &self,
        format: &OutputFormat,
        path: &Path,
    ) -> Result<Box<dyn ContainerMuxer>, MuxError>;
}
