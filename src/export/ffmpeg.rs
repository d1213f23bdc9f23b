//! FFmpeg-backed container muxer
//!
//! Packets are streamed to an `ffmpeg` child process as MPEG-TS over
//! stdin; FFmpeg copies the video stream into the requested container.
//! For MP4 with fast-start, FFmpeg performs the second pass that moves the
//! `moov` atom to the front when the input ends.
//!
//! FFmpeg learns the dimensions from the in-band parameter sets and the
//! media timescale from `-video_track_timescale`. With no packets FFmpeg
//! cannot identify the stream, so an empty export stops the process and writes
//! the movie through [`mp4::write_empty_movie`].

use super::mp4;
use super::mpegts::{TsWriter, MPEG_TIME_BASE};
use super::muxer::{ContainerMuxer, MuxerFactory, StreamInfo};
use super::types::{MuxError, OutputFormat};
use crate::encoder::CodecParameters;
use crate::packet::EncodedPacket;
use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

/// Stderr kept for error reports; the rest is read and discarded
const STDERR_LIMIT: usize = 64 * 1024;

/// Creates [`FfmpegMuxer`]s that run the given `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegMuxerFactory {
    ffmpeg_path: PathBuf,
}

impl FfmpegMuxerFactory {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Default for FfmpegMuxerFactory {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl MuxerFactory for FfmpegMuxerFactory {
    fn open(
        &self,
        format: &OutputFormat,
        path: &Path,
    ) -> Result<Box<dyn ContainerMuxer>, MuxError> {
        if format.name != "mp4" {
            return Err(MuxError::Unsupported(format!(
                "output format '{}'",
                format.name
            )));
        }

        // Claim the file now so an unwritable destination fails before FFmpeg starts
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Box::new(FfmpegMuxer::new(
            self.ffmpeg_path.clone(),
            *format,
            path.to_path_buf(),
        )))
    }
}

/// One FFmpeg remux process writing one output file
pub struct FfmpegMuxer {
    ffmpeg_path: PathBuf,
    format: OutputFormat,
    output_path: PathBuf,
    params: Option<CodecParameters>,
    ts: Option<TsWriter>,
    process: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    scratch: Vec<u8>,
    packets: usize,
}

impl FfmpegMuxer {
    fn new(ffmpeg_path: PathBuf, format: OutputFormat, output_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            format,
            output_path,
            params: None,
            ts: None,
            process: None,
            stdin: None,
            stderr: None,
            scratch: Vec::new(),
            packets: 0,
        }
    }

    /// Command line for the remux process
    fn build_args(&self, params: &CodecParameters) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "mpegts".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-video_track_timescale".to_string(),
            params.time_base.den().to_string(),
            "-f".to_string(),
            self.format.name.to_string(),
        ];

        if self.format.fast_start {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.push(self.output_path.to_string_lossy().to_string());
        args
    }

    fn send(&mut self) -> Result<(), MuxError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MuxError::InvalidState("header has not been written".to_string()))?;
        stdin.write_all(&self.scratch)?;
        self.scratch.clear();
        Ok(())
    }

    /// Join the stderr drain thread and return what FFmpeg printed
    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .unwrap_or_default()
    }

    /// Stop FFmpeg without output and write the zero-sample movie
    fn finish_empty(&mut self, mut process: Child) -> Result<(), MuxError> {
        let _ = process.kill();
        let _ = process.wait();
        self.collect_stderr();

        let params = self
            .params
            .as_ref()
            .ok_or_else(|| MuxError::InvalidState("no stream added".to_string()))?;
        mp4::write_empty_movie(&self.output_path, params)?;

        tracing::debug!("Wrote empty movie {:?}", self.output_path);
        Ok(())
    }
}

/// Read stderr until FFmpeg closes it so the pipe never fills up
fn drain_stderr(stderr: ChildStderr) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut kept = Vec::new();
        let mut buffer = vec![0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = STDERR_LIMIT.saturating_sub(kept.len());
                    kept.extend_from_slice(&buffer[..n.min(room)]);
                }
            }
        }
        kept
    })
}

impl ContainerMuxer for FfmpegMuxer {
    fn add_stream(&mut self, params: &CodecParameters) -> Result<StreamInfo, MuxError> {
        if self.params.is_some() {
            return Err(MuxError::InvalidState(
                "only one stream is supported".to_string(),
            ));
        }
        if !params.extradata.is_empty() && !is_annex_b(&params.extradata) {
            return Err(MuxError::Unsupported(
                "extradata must be Annex B parameter sets".to_string(),
            ));
        }

        tracing::debug!(
            "Output #0, {}, to {:?}: Stream #0:0: {} {}x{}, tbn {}, {:?} bps",
            self.format.name,
            self.output_path,
            params.codec.name(),
            params.width,
            params.height,
            MPEG_TIME_BASE,
            params.bit_rate
        );

        self.ts = Some(TsWriter::new(params.codec));
        self.params = Some(params.clone());
        Ok(StreamInfo {
            index: 0,
            time_base: MPEG_TIME_BASE,
        })
    }

    fn write_header(&mut self) -> Result<(), MuxError> {
        if self.process.is_some() {
            return Err(MuxError::InvalidState("header already written".to_string()));
        }
        let (Some(ts), Some(params)) = (self.ts.as_mut(), self.params.as_ref()) else {
            return Err(MuxError::InvalidState("no stream added".to_string()));
        };
        ts.write_tables(&mut self.scratch);

        let args = self.build_args(params);
        tracing::debug!("Starting FFmpeg muxer: {:?} {:?}", self.ffmpeg_path, args);

        let mut process = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MuxError::Ffmpeg(format!("Failed to start FFmpeg muxer: {}", e)))?;

        let stdin = process.stdin.take();
        self.stderr = process.stderr.take().map(drain_stderr);
        self.process = Some(process);
        let stdin =
            stdin.ok_or_else(|| MuxError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;
        self.stdin = Some(BufWriter::new(stdin));

        self.send()
    }

    fn write_packet(
        &mut self,
        _stream: &StreamInfo,
        packet: &EncodedPacket,
    ) -> Result<(), MuxError> {
        if self.stdin.is_none() {
            return Err(MuxError::InvalidState(
                "header has not been written".to_string(),
            ));
        }
        let (Some(ts), Some(params)) = (self.ts.as_mut(), self.params.as_ref()) else {
            return Err(MuxError::InvalidState("no stream added".to_string()));
        };

        // In-band parameter sets so every keyframe is decodable on its own
        if packet.keyframe && !params.extradata.is_empty() {
            let mut unit = Vec::with_capacity(params.extradata.len() + packet.size());
            unit.extend_from_slice(&params.extradata);
            unit.extend_from_slice(&packet.data);
            ts.write_access_unit(&mut self.scratch, &unit, packet.pts, packet.dts, true);
        } else {
            ts.write_access_unit(
                &mut self.scratch,
                &packet.data,
                packet.pts,
                packet.dts,
                packet.keyframe,
            );
        }

        self.packets += 1;
        self.send()
    }

    fn write_trailer(&mut self) -> Result<(), MuxError> {
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| MuxError::InvalidState("header has not been written".to_string()))?;
        let mut process = self
            .process
            .take()
            .ok_or_else(|| MuxError::InvalidState("FFmpeg is not running".to_string()))?;

        if self.packets == 0 {
            drop(stdin);
            return self.finish_empty(process);
        }

        stdin.flush()?;
        // Closing stdin signals EOF; FFmpeg then writes the moov atom
        drop(stdin);

        let status = process
            .wait()
            .map_err(|e| MuxError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;
        let stderr = self.collect_stderr();

        if !status.success() {
            return Err(MuxError::Ffmpeg(format!("FFmpeg exited with {}: {}", status, stderr)));
        }

        tracing::debug!("FFmpeg muxer finished writing {:?}", self.output_path);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), MuxError> {
        if self.process.is_some() {
            return Err(MuxError::InvalidState(
                "closed before the trailer was written".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        // Dropping stdin first lets a healthy process see EOF
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
            tracing::debug!("Killed unfinished FFmpeg muxer for {:?}", self.output_path);
        }
        self.collect_stderr();
    }
}

/// Whether `data` starts with an Annex B start code
fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}
