//! Recording muxer for pipeline tests
//!
//! Writes a small real file so disposal can be checked on disk, records
//! every call, counts releases in `Drop`, and can be told to fail at one
//! step.

use super::muxer::{ContainerMuxer, MuxerFactory, StreamInfo};
use super::types::{MuxError, OutputFormat};
use crate::encoder::CodecParameters;
use crate::packet::{EncodedPacket, Rational};
use parking_lot::Mutex;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Open,
    AddStream,
    Header,
    /// The n-th packet handed to the muxer (0-based)
    Packet(usize),
    Trailer,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MuxEvent {
    Open(PathBuf),
    AddStream(CodecParameters),
    Header,
    Packet(EncodedPacket),
    Trailer,
    Close,
}

#[derive(Debug, Default)]
pub struct MuxLog {
    pub events: Vec<MuxEvent>,
    pub opened: usize,
    pub released: usize,
}

impl MuxLog {
    pub fn packets(&self) -> Vec<EncodedPacket> {
        self.events
            .iter()
            .filter_map(|event| match event {
                MuxEvent::Packet(packet) => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct MockMuxerFactory {
    log: Arc<Mutex<MuxLog>>,
    fail_at: Option<FailAt>,
    time_base: Rational,
}

impl MockMuxerFactory {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(MuxLog::default())),
            fail_at: None,
            time_base: Rational::new(1, 90_000),
        }
    }

    pub fn failing_at(mut self, step: FailAt) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn log(&self) -> Arc<Mutex<MuxLog>> {
        self.log.clone()
    }
}

impl Default for MockMuxerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxerFactory for MockMuxerFactory {
    fn open(
        &self,
        _format: &OutputFormat,
        path: &Path,
    ) -> Result<Box<dyn ContainerMuxer>, MuxError> {
        if self.fail_at == Some(FailAt::Open) {
            return Err(MuxError::Ffmpeg("injected failure at Open".to_string()));
        }
        let file = File::create(path)?;

        let mut log = self.log.lock();
        log.events.push(MuxEvent::Open(path.to_path_buf()));
        log.opened += 1;

        Ok(Box::new(MockMuxer {
            log: self.log.clone(),
            fail_at: self.fail_at,
            time_base: self.time_base,
            file: Some(file),
            packets: 0,
        }))
    }
}

struct MockMuxer {
    log: Arc<Mutex<MuxLog>>,
    fail_at: Option<FailAt>,
    time_base: Rational,
    file: Option<File>,
    packets: usize,
}

impl MockMuxer {
    fn check(&self, step: FailAt) -> Result<(), MuxError> {
        if self.fail_at == Some(step) {
            return Err(MuxError::Ffmpeg(format!("injected failure at {:?}", step)));
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), MuxError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| MuxError::InvalidState("file already closed".to_string()))?;
        file.write_all(bytes)?;
        Ok(())
    }
}

impl ContainerMuxer for MockMuxer {
    fn add_stream(&mut self, params: &CodecParameters) -> Result<StreamInfo, MuxError> {
        self.check(FailAt::AddStream)?;
        self.log.lock().events.push(MuxEvent::AddStream(params.clone()));
        Ok(StreamInfo {
            index: 0,
            time_base: self.time_base,
        })
    }

    fn write_header(&mut self) -> Result<(), MuxError> {
        self.check(FailAt::Header)?;
        self.write(b"HEAD")?;
        self.log.lock().events.push(MuxEvent::Header);
        Ok(())
    }

    fn write_packet(
        &mut self,
        _stream: &StreamInfo,
        packet: &EncodedPacket,
    ) -> Result<(), MuxError> {
        let index = self.packets;
        self.packets += 1;
        self.check(FailAt::Packet(index))?;
        self.write(&packet.data)?;
        self.log.lock().events.push(MuxEvent::Packet(packet.clone()));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), MuxError> {
        self.check(FailAt::Trailer)?;
        self.write(b"TAIL")?;
        self.log.lock().events.push(MuxEvent::Trailer);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), MuxError> {
        self.check(FailAt::Close)?;
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self.log.lock().events.push(MuxEvent::Close);
        Ok(())
    }
}

impl Drop for MockMuxer {
    fn drop(&mut self) {
        self.log.lock().released += 1;
    }
}
