//! Export pipeline orchestration
//!
//! This module turns the current contents of the replay buffer into a
//! finished MP4 file: resolve the path, open the muxer, mirror the
//! encoder's stream, snapshot, normalize, rescale and write the packets,
//! then finalize.

use super::muxer::{ContainerMuxer, MuxerFactory, StreamInfo};
use super::normalize::normalize_timestamps;
use super::session::ExportSession;
use super::types::{
    ExportError, ExportOptions, ExportReport, ExportStage, FailedFilePolicy, MuxStep,
    OutputFormat,
};
use crate::buffer::{ReplayBuffer, Snapshot};
use crate::encoder::EncoderParameters;
use crate::packet::{EncodedPacket, Rational};
use crate::path::OutputPathResolver;
use std::path::Path;
use std::sync::Arc;

/// Totals gathered while writing packets
#[derive(Debug, Default)]
struct WriteStats {
    packets: usize,
    bytes: usize,
    /// Largest end timestamp seen, in the stream time-base
    end: i64,
}

impl WriteStats {
    fn record(&mut self, packet: &EncodedPacket) {
        self.packets += 1;
        self.bytes += packet.size();
        if let Some(ts) = packet.pts.or(packet.dts) {
            self.end = self.end.max(ts.saturating_add(packet.duration.max(0)));
        }
    }
}

/// Saves the replay window to disk on demand
pub struct ExportPipeline {
    buffer: Arc<ReplayBuffer>,
    encoder: Arc<dyn EncoderParameters>,
    paths: Box<dyn OutputPathResolver>,
    muxers: Box<dyn MuxerFactory>,
    options: ExportOptions,
}

impl ExportPipeline {
    /// Create a new export pipeline with default options
    pub fn new(
        buffer: Arc<ReplayBuffer>,
        encoder: Arc<dyn EncoderParameters>,
        paths: impl OutputPathResolver + 'static,
        muxers: impl MuxerFactory + 'static,
    ) -> Self {
        Self {
            buffer,
            encoder,
            paths: Box::new(paths),
            muxers: Box::new(muxers),
            options: ExportOptions::default(),
        }
    }

    /// Set the options and return self (builder pattern)
    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    /// The live buffer this pipeline reads from
    pub fn buffer(&self) -> &Arc<ReplayBuffer> {
        &self.buffer
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Write the current replay window to a new file.
    ///
    /// Blocks until the file is finalized or the export fails. The live
    /// buffer is only touched to take the snapshot; a failed export leaves
    /// it as it was.
    pub fn export_replay(&self) -> Result<ExportReport, ExportError> {
        let mut session = ExportSession::new();
        let span = tracing::info_span!("export", session = %session.id);
        let _enter = span.enter();

        match self.write_replay(&mut session) {
            Ok(report) => {
                session.advance(ExportStage::Closed);
                tracing::info!(
                    "Successfully saved replay to {:?} ({} packets, {:.2}s, {} ms)",
                    report.path,
                    report.packets_written,
                    report.duration_secs,
                    report.elapsed_ms
                );
                Ok(report)
            }
            Err(e) => {
                let opened = session.container_opened();
                session.advance(ExportStage::Aborted);
                tracing::error!("Failed to save replay: {}", e);

                if opened {
                    if let Some(path) = &session.path {
                        self.dispose_failed_file(path);
                    }
                }
                Err(e)
            }
        }
    }

    /// Steps 1 to 10. Every early return drops the muxer, releasing it
    /// before the caller looks at the file.
    fn write_replay(&self, session: &mut ExportSession) -> Result<ExportReport, ExportError> {
        let path = self.paths.resolve_output_path()?;
        session.path = Some(path.clone());
        session.advance(ExportStage::PathResolved);
        tracing::info!("Saving replay as {:?}", path);

        let format = OutputFormat::MP4_FAST_START;
        let mut muxer = self
            .muxers
            .open(&format, &path)
            .map_err(ExportError::at(MuxStep::OpenContainer))?;
        session.advance(ExportStage::ContainerOpened);

        let params = self.encoder.codec_parameters();
        let stream = muxer
            .add_stream(&params)
            .map_err(ExportError::at(MuxStep::AddStream))?;
        tracing::debug!(
            "Output stream #{}: {} {}x{}, encoder time-base {} -> stream time-base {}",
            stream.index,
            params.codec.name(),
            params.width,
            params.height,
            params.time_base,
            stream.time_base
        );

        muxer
            .write_header()
            .map_err(ExportError::at(MuxStep::WriteHeader))?;
        session.advance(ExportStage::HeaderWritten);

        session.advance(ExportStage::Snapshotting);
        let mut snapshot = Snapshot::with_capacity(self.buffer.capacity());
        self.buffer.snapshot(&mut snapshot);

        let written = self.write_packets(
            session,
            muxer.as_mut(),
            &stream,
            params.time_base,
            &mut snapshot,
        );
        // Released whether or not every packet made it
        snapshot.clear();
        let stats = written?;

        muxer
            .write_trailer()
            .map_err(ExportError::at(MuxStep::WriteTrailer))?;
        session.advance(ExportStage::TrailerWritten);

        muxer.close().map_err(ExportError::at(MuxStep::Close))?;

        Ok(ExportReport {
            session_id: session.id,
            path,
            packets_written: stats.packets,
            bytes_written: stats.bytes,
            duration_secs: stream.time_base.to_seconds(stats.end),
            elapsed_ms: session.elapsed_ms(),
        })
    }

    fn write_packets(
        &self,
        session: &mut ExportSession,
        muxer: &mut dyn ContainerMuxer,
        stream: &StreamInfo,
        encoder_time_base: Rational,
        snapshot: &mut Snapshot,
    ) -> Result<WriteStats, ExportError> {
        let mut stats = WriteStats::default();
        if snapshot.is_empty() {
            tracing::warn!("Replay buffer is empty, saving a file without packets");
            return Ok(stats);
        }

        session.advance(ExportStage::Normalizing);
        session.offsets = normalize_timestamps(snapshot, self.options.unknown_timestamps);
        tracing::debug!(
            "Normalizing {} packets by pts {} / dts {}",
            snapshot.len(),
            session.offsets.pts,
            session.offsets.dts
        );

        for (index, packet) in snapshot.iter_mut().enumerate() {
            session.advance(ExportStage::Writing { index });
            packet.rescale_ts(encoder_time_base, stream.time_base);
            muxer
                .write_packet(stream, packet)
                .map_err(ExportError::at(MuxStep::WritePacket { index }))?;
            stats.record(packet);
        }

        Ok(stats)
    }

    fn dispose_failed_file(&self, path: &Path) {
        match self.options.failed_files {
            FailedFilePolicy::Keep => {
                tracing::warn!("Keeping partially written replay {:?}", path);
            }
            FailedFilePolicy::Delete => match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("Removed partially written replay {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to remove partially written replay {:?}: {}", path, e)
                }
            },
        }
    }
}
