//! Per-export bookkeeping

use super::normalize::TimestampOffsets;
use super::types::ExportStage;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

/// State of one running export
#[derive(Debug)]
pub struct ExportSession {
    pub id: Uuid,
    pub path: Option<PathBuf>,
    pub stage: ExportStage,
    pub offsets: TimestampOffsets,
    started: Instant,
}

impl ExportSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            path: None,
            stage: ExportStage::Idle,
            offsets: TimestampOffsets::default(),
            started: Instant::now(),
        }
    }

    /// Move to `stage`, logging the transition
    pub fn advance(&mut self, stage: ExportStage) {
        match stage {
            // One line per packet is too noisy for debug
            ExportStage::Writing { index } => {
                tracing::trace!("Export stage {:?} -> writing packet {}", self.stage, index)
            }
            _ => tracing::debug!("Export stage {:?} -> {:?}", self.stage, stage),
        }
        self.stage = stage;
    }

    /// Whether the output container has been created on disk
    pub fn container_opened(&self) -> bool {
        !matches!(self.stage, ExportStage::Idle | ExportStage::PathResolved)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Default for ExportSession {
    fn default() -> Self {
        Self::new()
    }
}
