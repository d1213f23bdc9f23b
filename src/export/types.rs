//! Export types and configuration
//!
//! This module defines the output format, the per-export state machine,
//! the report handed back on success, and the error types.

use crate::path::PathError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use super::normalize::UnknownTimestampPolicy;

/// Container format the export writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Muxer name (as FFmpeg spells it)
    pub name: &'static str,
    /// Place the index before the media data so playback can start early
    pub fast_start: bool,
}

impl OutputFormat {
    /// MP4 with the `moov` atom moved to the front
    pub const MP4_FAST_START: OutputFormat = OutputFormat {
        name: "mp4",
        fast_start: true,
    };

    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        self.name
    }
}

/// What happens to a partially written file when an export fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedFilePolicy {
    /// Remove the file once the writer has been released
    #[default]
    Delete,
    /// Leave whatever was written on disk
    Keep,
}

/// Export behavior switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub failed_files: FailedFilePolicy,
    pub unknown_timestamps: UnknownTimestampPolicy,
}

/// Export state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExportStage {
    Idle,
    PathResolved,
    ContainerOpened,
    HeaderWritten,
    Snapshotting,
    Normalizing,
    /// Writing the packet at `index` of the snapshot
    Writing { index: usize },
    TrailerWritten,
    /// Terminal: file complete and writer released
    Closed,
    /// Terminal: a step failed
    Aborted,
}

impl ExportStage {
    /// Whether the export has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStage::Closed | ExportStage::Aborted)
    }
}

/// Muxer primitive that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxStep {
    OpenContainer,
    AddStream,
    WriteHeader,
    WritePacket { index: usize },
    WriteTrailer,
    Close,
}

impl std::fmt::Display for MuxStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MuxStep::OpenContainer => write!(f, "Opening the output container"),
            MuxStep::AddStream => write!(f, "Adding the video stream"),
            MuxStep::WriteHeader => write!(f, "Writing the container header"),
            MuxStep::WritePacket { index } => write!(f, "Writing packet {}", index),
            MuxStep::WriteTrailer => write!(f, "Writing the container trailer"),
            MuxStep::Close => write!(f, "Closing the output"),
        }
    }
}

/// Result of a completed export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    /// Session identifier (also present on every log line of the export)
    pub session_id: Uuid,
    /// File that was written
    pub path: PathBuf,
    /// Number of packets written
    pub packets_written: usize,
    /// Payload bytes handed to the muxer
    pub bytes_written: usize,
    /// Length of the saved window in seconds
    pub duration_secs: f64,
    /// Wall-clock time the export took
    pub elapsed_ms: u64,
}

/// Errors reported by a container muxer
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid muxer state: {0}")]
    InvalidState(String),
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to resolve output path: {0}")]
    Path(#[from] PathError),

    #[error("{step} failed: {source}")]
    Mux {
        step: MuxStep,
        #[source]
        source: MuxError,
    },

    #[error("An export is already in progress")]
    AlreadyExporting,

    #[error("Export task panicked: {0}")]
    Panicked(String),
}

impl ExportError {
    /// Adapter for `map_err` that tags a muxer error with its step
    pub fn at(step: MuxStep) -> impl FnOnce(MuxError) -> ExportError {
        move |source| ExportError::Mux { step, source }
    }

    /// The muxer step that failed, if the failure came from the muxer
    pub fn step(&self) -> Option<MuxStep> {
        match self {
            ExportError::Mux { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<ExportError> for String {
    fn from(e: ExportError) -> String {
        e.to_string()
    }
}
