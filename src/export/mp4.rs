//! Empty MP4 movie writer
//!
//! FFmpeg cannot remux a stream it never saw a frame of, so an export
//! without packets writes its file here: `ftyp` followed by a `moov` with
//! one video track and no samples. The track mirrors the encoder: sample
//! entry dimensions, parameter sets (`avcC`), bit-rate (`btrt`) and a media
//! timescale equal to the encoder time-base.

use super::types::MuxError;
use crate::encoder::{CodecParameters, VideoCodec};
use std::fs;
use std::path::Path;

const MOVIE_TIMESCALE: u32 = 1000;
const TRACK_ID: u32 = 1;
/// ISO 639-2 "und" packed into 15 bits
const LANGUAGE_UND: u16 = 0x55C4;
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

/// Write a playable zero-sample movie for `params` to `path`
pub fn write_empty_movie(path: &Path, params: &CodecParameters) -> Result<(), MuxError> {
    let movie = empty_movie(params)?;
    fs::write(path, movie)?;
    Ok(())
}

/// Serialize a zero-sample movie for `params`
pub fn empty_movie(params: &CodecParameters) -> Result<Vec<u8>, MuxError> {
    let sample_entry = match params.codec {
        VideoCodec::H264 => avc1_entry(params)?,
        VideoCodec::Hevc => {
            return Err(MuxError::Unsupported(
                "empty HEVC movies are not supported".to_string(),
            ))
        }
    };

    let mut out = ftyp();
    out.extend(moov(params, &sample_entry));
    Ok(out)
}

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.push(version);
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    mp4_box(kind, &body)
}

fn matrix(out: &mut Vec<u8>) {
    for value in UNITY_MATRIX {
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn ftyp() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(&0x200u32.to_be_bytes());
    for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
        payload.extend_from_slice(brand);
    }
    mp4_box(b"ftyp", &payload)
}

fn moov(params: &CodecParameters, sample_entry: &[u8]) -> Vec<u8> {
    let mut payload = mvhd();
    payload.extend(trak(params, sample_entry));
    mp4_box(b"moov", &payload)
}

fn mvhd() -> Vec<u8> {
    let mut p = Vec::with_capacity(96);
    p.extend_from_slice(&0u32.to_be_bytes()); // creation time
    p.extend_from_slice(&0u32.to_be_bytes()); // modification time
    p.extend_from_slice(&MOVIE_TIMESCALE.to_be_bytes());
    p.extend_from_slice(&0u32.to_be_bytes()); // duration
    p.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    p.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    p.extend_from_slice(&[0; 10]);
    matrix(&mut p);
    p.extend_from_slice(&[0; 24]);
    p.extend_from_slice(&(TRACK_ID + 1).to_be_bytes());
    full_box(b"mvhd", 0, 0, &p)
}

fn trak(params: &CodecParameters, sample_entry: &[u8]) -> Vec<u8> {
    let mut payload = tkhd(params);
    payload.extend(mdia(params, sample_entry));
    mp4_box(b"trak", &payload)
}

fn tkhd(params: &CodecParameters) -> Vec<u8> {
    let mut p = Vec::with_capacity(80);
    p.extend_from_slice(&0u32.to_be_bytes());
    p.extend_from_slice(&0u32.to_be_bytes());
    p.extend_from_slice(&TRACK_ID.to_be_bytes());
    p.extend_from_slice(&[0; 4]);
    p.extend_from_slice(&0u32.to_be_bytes()); // duration
    p.extend_from_slice(&[0; 8]);
    p.extend_from_slice(&[0; 8]); // layer, alternate group, volume, reserved
    matrix(&mut p);
    p.extend_from_slice(&(params.width << 16).to_be_bytes());
    p.extend_from_slice(&(params.height << 16).to_be_bytes());
    // enabled | in movie
    full_box(b"tkhd", 0, 0x3, &p)
}

fn mdia(params: &CodecParameters, sample_entry: &[u8]) -> Vec<u8> {
    let mut mdhd = Vec::with_capacity(20);
    mdhd.extend_from_slice(&0u32.to_be_bytes());
    mdhd.extend_from_slice(&0u32.to_be_bytes());
    mdhd.extend_from_slice(&params.time_base.den().to_be_bytes());
    mdhd.extend_from_slice(&0u32.to_be_bytes());
    mdhd.extend_from_slice(&LANGUAGE_UND.to_be_bytes());
    mdhd.extend_from_slice(&0u16.to_be_bytes());

    let mut hdlr = Vec::new();
    hdlr.extend_from_slice(&[0; 4]);
    hdlr.extend_from_slice(b"vide");
    hdlr.extend_from_slice(&[0; 12]);
    hdlr.extend_from_slice(b"VideoHandler\0");

    let mut payload = full_box(b"mdhd", 0, 0, &mdhd);
    payload.extend(full_box(b"hdlr", 0, 0, &hdlr));
    payload.extend(minf(sample_entry));
    mp4_box(b"mdia", &payload)
}

fn minf(sample_entry: &[u8]) -> Vec<u8> {
    let mut payload = full_box(b"vmhd", 0, 1, &[0; 8]);

    let mut dref = 1u32.to_be_bytes().to_vec();
    // Media is in this file
    dref.extend(full_box(b"url ", 0, 1, &[]));
    payload.extend(mp4_box(b"dinf", &full_box(b"dref", 0, 0, &dref)));

    let mut stsd = 1u32.to_be_bytes().to_vec();
    stsd.extend_from_slice(sample_entry);

    let mut stbl = full_box(b"stsd", 0, 0, &stsd);
    stbl.extend(full_box(b"stts", 0, 0, &0u32.to_be_bytes()));
    stbl.extend(full_box(b"stsc", 0, 0, &0u32.to_be_bytes()));
    stbl.extend(full_box(b"stsz", 0, 0, &[0; 8]));
    stbl.extend(full_box(b"stco", 0, 0, &0u32.to_be_bytes()));
    payload.extend(mp4_box(b"stbl", &stbl));

    mp4_box(b"minf", &payload)
}

fn avc1_entry(params: &CodecParameters) -> Result<Vec<u8>, MuxError> {
    let width = u16::try_from(params.width)
        .map_err(|_| MuxError::Unsupported(format!("width {}", params.width)))?;
    let height = u16::try_from(params.height)
        .map_err(|_| MuxError::Unsupported(format!("height {}", params.height)))?;

    let mut p = Vec::new();
    p.extend_from_slice(&[0; 6]);
    p.extend_from_slice(&1u16.to_be_bytes()); // data reference index
    p.extend_from_slice(&[0; 16]);
    p.extend_from_slice(&width.to_be_bytes());
    p.extend_from_slice(&height.to_be_bytes());
    p.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
    p.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    p.extend_from_slice(&[0; 4]);
    p.extend_from_slice(&1u16.to_be_bytes()); // frame count
    p.extend_from_slice(&[0; 32]); // compressor name
    p.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
    p.extend_from_slice(&0xFFFFu16.to_be_bytes());
    p.extend(mp4_box(b"avcC", &avc_config(&params.extradata)?));

    if let Some(bit_rate) = params.bit_rate {
        let bit_rate = u32::try_from(bit_rate).unwrap_or(u32::MAX);
        let mut btrt = 0u32.to_be_bytes().to_vec();
        btrt.extend_from_slice(&bit_rate.to_be_bytes());
        btrt.extend_from_slice(&bit_rate.to_be_bytes());
        p.extend(mp4_box(b"btrt", &btrt));
    }

    Ok(mp4_box(b"avc1", &p))
}

/// AVCDecoderConfigurationRecord built from Annex B SPS/PPS units
fn avc_config(extradata: &[u8]) -> Result<Vec<u8>, MuxError> {
    let units = nal_units(extradata);
    let sps: Vec<&[u8]> = units
        .iter()
        .copied()
        .filter(|nal| nal[0] & 0x1F == NAL_SPS)
        .collect();
    let pps: Vec<&[u8]> = units
        .iter()
        .copied()
        .filter(|nal| nal[0] & 0x1F == NAL_PPS)
        .collect();

    let Some(first) = sps.first().filter(|nal| nal.len() >= 4) else {
        return Err(MuxError::Unsupported(
            "an empty movie needs SPS extradata".to_string(),
        ));
    };
    if pps.is_empty() || sps.len() > 31 || pps.len() > 255 {
        return Err(MuxError::Unsupported(
            "an empty movie needs 1-31 SPS and 1-255 PPS units".to_string(),
        ));
    }

    let mut out = vec![1, first[1], first[2], first[3], 0xFF, 0xE0 | sps.len() as u8];
    for nal in &sps {
        out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out.push(pps.len() as u8);
    for nal in &pps {
        out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        out.extend_from_slice(nal);
    }
    Ok(out)
}

/// Split an Annex B byte stream into NAL units without start codes
fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i..i + 3] == [0, 0, 1] {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).map_or(data.len(), |&next| next - 3);
            let mut nal = &data[start..end];
            // Leading zero of the next 4-byte start code
            while let [rest @ .., 0] = nal {
                nal = rest;
            }
            nal
        })
        .filter(|nal| !nal.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Rational;

    const SPS: [u8; 8] = [0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40, 0x50];
    const PPS: [u8; 4] = [0x68, 0xEE, 0x3C, 0x80];

    fn params() -> CodecParameters {
        let mut extradata = vec![0, 0, 0, 1];
        extradata.extend_from_slice(&SPS);
        extradata.extend_from_slice(&[0, 0, 1]);
        extradata.extend_from_slice(&PPS);
        CodecParameters::h264(1280, 720, 30)
            .with_bit_rate(4_000_000)
            .with_extradata(extradata)
    }

    /// Top-level box types in order, checking that sizes tile the buffer
    fn top_level(data: &[u8]) -> Vec<[u8; 4]> {
        let mut kinds = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let size = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            assert!(size >= 8);
            kinds.push(data[pos + 4..pos + 8].try_into().unwrap());
            pos += size;
        }
        assert_eq!(pos, data.len());
        kinds
    }

    /// Payload start of the first box of type `kind`
    fn find(data: &[u8], kind: &[u8; 4]) -> usize {
        data.windows(4).position(|w| w == kind).unwrap() + 4
    }

    fn read_u32(data: &[u8], pos: usize) -> u32 {
        u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap())
    }

    #[test]
    fn test_layout_is_ftyp_then_moov() {
        let movie = empty_movie(&params()).unwrap();
        assert_eq!(top_level(&movie), vec![*b"ftyp", *b"moov"]);
    }

    #[test]
    fn test_track_mirrors_parameters() {
        let movie = empty_movie(&params()).unwrap();

        // tkhd: version/flags, times, track id, reserved, duration, reserved, misc, matrix
        let tkhd = find(&movie, b"tkhd") + 4 + 4 * 5 + 8 + 8 + 36;
        assert_eq!(read_u32(&movie, tkhd), 1280 << 16);
        assert_eq!(read_u32(&movie, tkhd + 4), 720 << 16);

        let mdhd = find(&movie, b"mdhd") + 4 + 8;
        assert_eq!(read_u32(&movie, mdhd), 30);

        let btrt = find(&movie, b"btrt");
        assert_eq!(read_u32(&movie, btrt + 8), 4_000_000);

        let avcc = find(&movie, b"avcC");
        assert_eq!(&movie[avcc..avcc + 6], &[1, 0x64, 0x00, 0x1F, 0xFF, 0xE1]);
        assert_eq!(&movie[avcc + 8..avcc + 8 + SPS.len()], &SPS);
        let pps_count = avcc + 8 + SPS.len();
        assert_eq!(movie[pps_count], 1);
        assert_eq!(&movie[pps_count + 3..pps_count + 3 + PPS.len()], &PPS);
    }

    #[test]
    fn test_sample_tables_are_empty() {
        let movie = empty_movie(&params()).unwrap();
        for kind in [b"stts", b"stsc", b"stco"] {
            assert_eq!(read_u32(&movie, find(&movie, kind) + 4), 0);
        }
        let stsz = find(&movie, b"stsz") + 4;
        assert_eq!(read_u32(&movie, stsz + 4), 0);
    }

    #[test]
    fn test_requires_parameter_sets() {
        let no_extradata = CodecParameters::h264(640, 480, 30);
        assert!(matches!(
            empty_movie(&no_extradata),
            Err(MuxError::Unsupported(_))
        ));

        let mut hevc = params();
        hevc.codec = VideoCodec::Hevc;
        hevc.time_base = Rational::new(1, 90_000);
        assert!(matches!(empty_movie(&hevc), Err(MuxError::Unsupported(_))));
    }

    #[test]
    fn test_nal_units_strip_start_codes() {
        let data = [0, 0, 0, 1, 0x67, 0x01, 0, 0, 1, 0x68, 0x02, 0, 0, 0, 1, 0x65];
        let units = nal_units(&data);
        assert_eq!(units, vec![&[0x67, 0x01][..], &[0x68, 0x02][..], &[0x65][..]]);
    }
}
