//! Compressed video packet

use super::Rational;

/// One compressed video unit with its timing metadata.
///
/// The payload is owned, so cloning a packet copies its bytes. A `None`
/// timestamp means the encoder did not know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Annex B bitstream (H.264 or HEVC NAL units)
    pub data: Vec<u8>,
    /// Presentation timestamp in `time_base` units
    pub pts: Option<i64>,
    /// Decoding timestamp in `time_base` units
    pub dts: Option<i64>,
    /// Duration in `time_base` units (0 if unknown)
    pub duration: i64,
    /// Unit of `pts`, `dts` and `duration`
    pub time_base: Rational,
    /// Whether the packet starts a decodable picture (IDR)
    pub keyframe: bool,
}

impl EncodedPacket {
    /// Create a packet with unknown timestamps
    pub fn new(data: Vec<u8>, time_base: Rational) -> Self {
        Self {
            data,
            pts: None,
            dts: None,
            duration: 0,
            time_base,
            keyframe: false,
        }
    }

    /// Set the timestamps and return self (builder pattern)
    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// Set the duration and return self
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    /// Mark the packet as a keyframe and return self
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Rescale pts, dts and duration from `from` into `to`.
    ///
    /// Unknown timestamps stay unknown.
    pub fn rescale_ts(&mut self, from: Rational, to: Rational) {
        self.pts = self.pts.map(|pts| from.rescale(pts, to));
        self.dts = self.dts.map(|dts| from.rescale(dts, to));
        if self.duration > 0 {
            self.duration = from.rescale(self.duration, to);
        }
        self.time_base = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let packet = EncodedPacket::new(vec![0, 0, 1, 0x65], Rational::new(1, 30))
            .with_timestamps(Some(10), Some(9))
            .with_duration(1)
            .with_keyframe(true);

        assert_eq!(packet.pts, Some(10));
        assert_eq!(packet.dts, Some(9));
        assert_eq!(packet.duration, 1);
        assert!(packet.keyframe);
        assert_eq!(packet.size(), 4);
    }

    #[test]
    fn test_clone_copies_payload() {
        let original = EncodedPacket::new(vec![1, 2, 3], Rational::new(1, 30));
        let mut copy = original.clone();
        copy.data[0] = 9;

        assert_eq!(original.data, vec![1, 2, 3]);
        assert_ne!(original.data.as_ptr(), copy.data.as_ptr());
    }

    #[test]
    fn test_rescale_ts() {
        let mut packet = EncodedPacket::new(vec![], Rational::new(1, 30))
            .with_timestamps(Some(2), Some(1))
            .with_duration(1);

        packet.rescale_ts(Rational::new(1, 30), Rational::new(1, 90000));

        assert_eq!(packet.pts, Some(6000));
        assert_eq!(packet.dts, Some(3000));
        assert_eq!(packet.duration, 3000);
        assert_eq!(packet.time_base, Rational::new(1, 90000));
    }

    #[test]
    fn test_rescale_ts_keeps_unknown() {
        let mut packet = EncodedPacket::new(vec![], Rational::new(1, 30));
        packet.rescale_ts(Rational::new(1, 30), Rational::new(1, 90000));

        assert_eq!(packet.pts, None);
        assert_eq!(packet.dts, None);
        assert_eq!(packet.duration, 0);
    }
}
