//! Minimal MPEG transport stream writer
//!
//! Used to hand packets to FFmpeg over a pipe without losing their
//! timestamps: one program, one video elementary stream, PAT/PMT tables,
//! and PES packets carrying PTS/DTS in the 90 kHz clock.

use crate::encoder::VideoCodec;
use crate::packet::Rational;

/// Size of one transport stream packet
pub const TS_PACKET_SIZE: usize = 188;

/// Time-base of PTS, DTS and PCR base values
pub const MPEG_TIME_BASE: Rational = Rational::new(1, 90_000);

const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;
const PMT_PID: u16 = 0x1000;
const VIDEO_PID: u16 = 0x0100;
const PROGRAM_NUMBER: u16 = 1;
const TRANSPORT_STREAM_ID: u16 = 1;
const VIDEO_STREAM_ID: u8 = 0xE0;

/// Added to every timestamp so reordered frames before the first one stay positive
const TIMESTAMP_BASE: i64 = 10 * 90_000;
const TIMESTAMP_MASK: i64 = (1 << 33) - 1;

/// Stream type byte announced in the PMT
fn stream_type(codec: VideoCodec) -> u8 {
    match codec {
        VideoCodec::H264 => 0x1B,
        VideoCodec::Hevc => 0x24,
    }
}

/// Stateful writer tracking per-PID continuity counters
pub struct TsWriter {
    stream_type: u8,
    pat_cc: u8,
    pmt_cc: u8,
    video_cc: u8,
}

impl TsWriter {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            stream_type: stream_type(codec),
            pat_cc: 0,
            pmt_cc: 0,
            video_cc: 0,
        }
    }

    /// Append a PAT and a PMT packet to `out`
    pub fn write_tables(&mut self, out: &mut Vec<u8>) {
        let pat = pat_section();
        write_psi_packet(out, PAT_PID, &mut self.pat_cc, &pat);

        let pmt = pmt_section(self.stream_type);
        write_psi_packet(out, PMT_PID, &mut self.pmt_cc, &pmt);
    }

    /// Append one access unit as a PES packet split into TS packets.
    ///
    /// `pts` and `dts` are in 90 kHz ticks. An unknown pts falls back to dts.
    pub fn write_access_unit(
        &mut self,
        out: &mut Vec<u8>,
        payload: &[u8],
        pts: Option<i64>,
        dts: Option<i64>,
        random_access: bool,
    ) {
        let pts = pts.or(dts);
        let pes = pes_packet(payload, pts, dts);
        let pcr = dts.or(pts).map(|ts| wrap_timestamp(ts) as u64);
        packetize(out, VIDEO_PID, &mut self.video_cc, &pes, random_access, pcr);
    }
}

fn wrap_timestamp(ts: i64) -> i64 {
    ts.wrapping_add(TIMESTAMP_BASE) & TIMESTAMP_MASK
}

fn pat_section() -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&TRANSPORT_STREAM_ID.to_be_bytes());
    body.push(0xC1); // version 0, current
    body.push(0x00); // section number
    body.push(0x00); // last section number
    body.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
    body.extend_from_slice(&(0xE000 | PMT_PID).to_be_bytes());
    psi_section(0x00, &body)
}

fn pmt_section(stream_type: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(24);
    body.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
    body.push(0xC1);
    body.push(0x00);
    body.push(0x00);
    body.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes()); // PCR PID
    body.extend_from_slice(&0xF000u16.to_be_bytes()); // no program info
    body.push(stream_type);
    body.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes());
    body.extend_from_slice(&0xF000u16.to_be_bytes()); // no ES info
    psi_section(0x02, &body)
}

/// Wrap a section body with table id, length and CRC
fn psi_section(table_id: u8, body: &[u8]) -> Vec<u8> {
    let section_length = (body.len() + 4) as u16;
    let mut section = Vec::with_capacity(body.len() + 7);
    section.push(table_id);
    section.extend_from_slice(&(0xB000 | section_length).to_be_bytes());
    section.extend_from_slice(body);
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

fn write_psi_packet(out: &mut Vec<u8>, pid: u16, cc: &mut u8, section: &[u8]) {
    let start = out.len();
    write_header(out, pid, true, false, cc);
    out.push(0x00); // pointer field
    out.extend_from_slice(section);
    out.resize(start + TS_PACKET_SIZE, 0xFF);
}

/// Build a PES packet with an unbounded length
fn pes_packet(payload: &[u8], pts: Option<i64>, dts: Option<i64>) -> Vec<u8> {
    let mut pes = Vec::with_capacity(payload.len() + 19);
    pes.extend_from_slice(&[0x00, 0x00, 0x01, VIDEO_STREAM_ID, 0x00, 0x00]);
    pes.push(0x80);

    match (pts, dts) {
        (Some(pts), Some(dts)) if pts != dts => {
            pes.push(0xC0);
            pes.push(10);
            pes.extend_from_slice(&encode_timestamp(0x3, wrap_timestamp(pts)));
            pes.extend_from_slice(&encode_timestamp(0x1, wrap_timestamp(dts)));
        }
        (Some(pts), _) => {
            pes.push(0x80);
            pes.push(5);
            pes.extend_from_slice(&encode_timestamp(0x2, wrap_timestamp(pts)));
        }
        (None, _) => {
            pes.push(0x00);
            pes.push(0);
        }
    }

    pes.extend_from_slice(payload);
    pes
}

fn encode_timestamp(prefix: u8, ts: i64) -> [u8; 5] {
    let ts = ts as u64;
    [
        (prefix << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 1,
        (ts >> 22) as u8,
        ((((ts >> 15) & 0x7F) as u8) << 1) | 1,
        (ts >> 7) as u8,
        (((ts & 0x7F) as u8) << 1) | 1,
    ]
}

fn encode_pcr(base: u64) -> [u8; 6] {
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 1) as u8) << 7) | 0x7E,
        0x00,
    ]
}

fn write_header(out: &mut Vec<u8>, pid: u16, unit_start: bool, adaptation: bool, cc: &mut u8) {
    out.push(SYNC_BYTE);
    out.push(((unit_start as u8) << 6) | ((pid >> 8) as u8 & 0x1F));
    out.push(pid as u8);
    let control = if adaptation { 0x30 } else { 0x10 };
    out.push(control | (*cc & 0x0F));
    *cc = (*cc + 1) & 0x0F;
}

/// Split `data` into TS packets, stuffing the last one through its adaptation field
fn packetize(
    out: &mut Vec<u8>,
    pid: u16,
    cc: &mut u8,
    data: &[u8],
    random_access: bool,
    pcr: Option<u64>,
) {
    let mut offset = 0;
    let mut first = true;

    while offset < data.len() {
        // Adaptation field content after its length byte; None means no field
        let mut adaptation: Option<Vec<u8>> = None;
        if first && (random_access || pcr.is_some()) {
            let mut field = Vec::with_capacity(7);
            let mut flags = 0u8;
            if random_access {
                flags |= 0x40;
            }
            if pcr.is_some() {
                flags |= 0x10;
            }
            field.push(flags);
            if let Some(pcr) = pcr {
                field.extend_from_slice(&encode_pcr(pcr));
            }
            adaptation = Some(field);
        }

        let remaining = data.len() - offset;
        let field_size = adaptation.as_ref().map_or(0, |f| 1 + f.len());
        let space = TS_PACKET_SIZE - 4 - field_size;
        if remaining < space {
            let stuffing = space - remaining;
            match adaptation.as_mut() {
                Some(field) => field.resize(field.len() + stuffing, 0xFF),
                None if stuffing == 1 => adaptation = Some(Vec::new()),
                None => {
                    let mut field = vec![0x00];
                    field.resize(stuffing - 1, 0xFF);
                    adaptation = Some(field);
                }
            }
        }

        let field_size = adaptation.as_ref().map_or(0, |f| 1 + f.len());
        let chunk = remaining.min(TS_PACKET_SIZE - 4 - field_size);

        write_header(out, pid, first, adaptation.is_some(), cc);
        if let Some(field) = adaptation {
            out.push(field.len() as u8);
            out.extend_from_slice(&field);
        }
        out.extend_from_slice(&data[offset..offset + chunk]);

        offset += chunk;
        first = false;
    }
}

/// CRC-32/MPEG-2 as used by PSI sections
fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_timestamp(bytes: &[u8]) -> i64 {
        (((bytes[0] as i64 >> 1) & 0x07) << 30)
            | ((bytes[1] as i64) << 22)
            | (((bytes[2] as i64) >> 1) << 15)
            | ((bytes[3] as i64) << 7)
            | ((bytes[4] as i64) >> 1)
    }

    /// Concatenate the payloads of all packets on `pid`
    fn reassemble(stream: &[u8], pid: u16) -> Vec<u8> {
        let mut payload = Vec::new();
        for packet in stream.chunks(TS_PACKET_SIZE) {
            let packet_pid = (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16;
            if packet_pid != pid {
                continue;
            }
            let mut start = 4;
            if packet[3] & 0x20 != 0 {
                start += 1 + packet[4] as usize;
            }
            payload.extend_from_slice(&packet[start..]);
        }
        payload
    }

    #[test]
    fn test_crc32_mpeg2() {
        let section = [
            0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xF0, 0x00,
        ];
        assert_eq!(crc32_mpeg2(&section), 0x2AB1_04B2);
    }

    #[test]
    fn test_pat_packet_layout() {
        let mut writer = TsWriter::new(VideoCodec::H264);
        let mut out = Vec::new();
        writer.write_tables(&mut out);

        assert_eq!(out.len(), 2 * TS_PACKET_SIZE);
        assert_eq!(
            &out[..21],
            &[
                0x47, 0x40, 0x00, 0x10, 0x00, 0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00,
                0x00, 0x01, 0xF0, 0x00, 0x2A, 0xB1, 0x04, 0xB2
            ]
        );
        assert!(out[21..TS_PACKET_SIZE].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_pmt_announces_codec() {
        let mut writer = TsWriter::new(VideoCodec::Hevc);
        let mut out = Vec::new();
        writer.write_tables(&mut out);

        let pmt = &out[TS_PACKET_SIZE..];
        assert_eq!(pmt[0], 0x47);
        assert_eq!(((pmt[1] & 0x1F) as u16) << 8 | pmt[2] as u16, PMT_PID);
        // header, pointer, table id, length(2), program(2), version, sec, last, pcr(2), info(2)
        assert_eq!(pmt[5], 0x02);
        assert_eq!(pmt[17], 0x24);

        // CRC over a section including its own CRC is zero
        let section_len = (((pmt[6] & 0x0F) as usize) << 8) | pmt[7] as usize;
        assert_eq!(crc32_mpeg2(&pmt[5..8 + section_len]), 0);
    }

    #[test]
    fn test_access_unit_packets_are_well_formed() {
        let mut writer = TsWriter::new(VideoCodec::H264);
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let mut out = Vec::new();
        writer.write_access_unit(&mut out, &payload, Some(3000), Some(0), true);

        assert_eq!(out.len() % TS_PACKET_SIZE, 0);
        for (i, packet) in out.chunks(TS_PACKET_SIZE).enumerate() {
            assert_eq!(packet[0], SYNC_BYTE);
            let unit_start = packet[1] & 0x40 != 0;
            assert_eq!(unit_start, i == 0);
            assert_eq!(packet[3] & 0x0F, i as u8 & 0x0F);
        }

        // First packet carries random access and PCR
        let first = &out[..TS_PACKET_SIZE];
        assert_eq!(first[3] & 0x30, 0x30);
        assert_eq!(first[5] & 0x50, 0x50);

        let pes = reassemble(&out, VIDEO_PID);
        assert_eq!(&pes[..4], &[0x00, 0x00, 0x01, VIDEO_STREAM_ID]);
        assert_eq!(pes[7], 0xC0);
        assert_eq!(decode_timestamp(&pes[9..14]), 3000 + TIMESTAMP_BASE);
        assert_eq!(decode_timestamp(&pes[14..19]), TIMESTAMP_BASE);
        assert_eq!(&pes[19..], &payload[..]);
    }

    #[test]
    fn test_small_access_unit_is_stuffed() {
        let mut writer = TsWriter::new(VideoCodec::H264);
        let mut out = Vec::new();
        writer.write_access_unit(&mut out, &[0, 0, 0, 1, 0x41, 0x9A], Some(7), Some(7), false);

        assert_eq!(out.len(), TS_PACKET_SIZE);
        let pes = reassemble(&out, VIDEO_PID);
        // Equal pts/dts are sent as pts only
        assert_eq!(pes[7], 0x80);
        assert_eq!(decode_timestamp(&pes[9..14]), 7 + TIMESTAMP_BASE);
        assert_eq!(&pes[14..], &[0, 0, 0, 1, 0x41, 0x9A]);
    }

    #[test]
    fn test_stuffing_of_every_size() {
        // Exercise the one-byte and two-byte stuffing cases on a continuation packet
        for len in 150..200 {
            let mut writer = TsWriter::new(VideoCodec::H264);
            let payload = vec![0xABu8; len];
            let mut out = Vec::new();
            writer.write_access_unit(&mut out, &payload, None, None, false);

            assert_eq!(out.len() % TS_PACKET_SIZE, 0, "len {}", len);
            let pes = reassemble(&out, VIDEO_PID);
            assert_eq!(pes[7], 0x00);
            assert_eq!(&pes[9..], &payload[..], "len {}", len);
        }
    }

    #[test]
    fn test_negative_timestamps_are_shifted() {
        assert_eq!(wrap_timestamp(-3000), TIMESTAMP_BASE - 3000);
        assert_eq!(wrap_timestamp(0), TIMESTAMP_BASE);
    }
}
