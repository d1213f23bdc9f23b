//! Encoder collaborator interface
//!
//! The encoder runs for the whole process lifetime and is the only
//! producer appending into the replay buffer. Export only needs to read
//! its current codec configuration so the output stream can mirror it.

use crate::packet::Rational;
use serde::{Deserialize, Serialize};

/// Video codecs the export path can repackage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    /// Short codec name, as FFmpeg spells it
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
        }
    }
}

/// Codec configuration of the live encoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecParameters {
    /// Codec identity
    pub codec: VideoCodec,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Time-base of the packets the encoder produces
    pub time_base: Rational,
    /// Nominal frame rate (frames per second as a rational)
    pub frame_rate: Rational,
    /// Target bit-rate in bits per second, if the encoder has one
    pub bit_rate: Option<u64>,
    /// Out-of-band parameter sets (SPS/PPS, plus VPS for HEVC) in Annex B form
    #[serde(default)]
    pub extradata: Vec<u8>,
}

impl CodecParameters {
    /// Parameters for an H.264 stream whose time-base is one tick per frame.
    ///
    /// Panics if `fps` is zero.
    pub fn h264(width: u32, height: u32, fps: u32) -> Self {
        Self {
            codec: VideoCodec::H264,
            width,
            height,
            time_base: Rational::new(1, fps),
            frame_rate: Rational::new(fps, 1),
            bit_rate: None,
            extradata: Vec::new(),
        }
    }

    /// Set the bit-rate hint and return self
    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    /// Set the out-of-band parameter sets and return self
    pub fn with_extradata(mut self, extradata: Vec<u8>) -> Self {
        self.extradata = extradata;
        self
    }
}

/// Read access to the live encoder's configuration.
///
/// Called once per export, from the export context, while the encoder
/// keeps running.
pub trait EncoderParameters: Send + Sync {
    /// Current codec configuration
    fn codec_parameters(&self) -> CodecParameters;
}

impl EncoderParameters for CodecParameters {
    fn codec_parameters(&self) -> CodecParameters {
        self.clone()
    }
}

impl EncoderParameters for parking_lot::RwLock<CodecParameters> {
    fn codec_parameters(&self) -> CodecParameters {
        self.read().clone()
    }
}
