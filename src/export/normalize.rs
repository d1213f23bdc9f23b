//! Timestamp normalization
//!
//! The encoder runs from process start, so the packets in a snapshot carry
//! large timestamps relative to an arbitrary origin. Shifting by the first
//! packet's pts/dts makes the saved stream start at zero.

use crate::buffer::Snapshot;
use crate::packet::EncodedPacket;
use serde::{Deserialize, Serialize};

/// Handling of unknown timestamps after the first packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownTimestampPolicy {
    /// Leave them unknown and let the muxer deal with it
    #[default]
    Propagate,
    /// Replace them with zero
    Zero,
}

/// Offsets subtracted from every packet's pts and dts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampOffsets {
    pub pts: i64,
    pub dts: i64,
}

impl TimestampOffsets {
    /// Offsets taken from the first packet; an unknown timestamp gives a zero offset
    pub fn from_first(first: Option<&EncodedPacket>) -> Self {
        match first {
            Some(packet) => Self {
                pts: packet.pts.unwrap_or(0),
                dts: packet.dts.unwrap_or(0),
            },
            None => Self::default(),
        }
    }

    /// Shift one packet's timestamps
    pub fn apply(&self, packet: &mut EncodedPacket, policy: UnknownTimestampPolicy) {
        packet.pts = shift(packet.pts, self.pts, policy);
        packet.dts = shift(packet.dts, self.dts, policy);
    }
}

fn shift(ts: Option<i64>, offset: i64, policy: UnknownTimestampPolicy) -> Option<i64> {
    match (ts, policy) {
        (Some(ts), _) => Some(ts.saturating_sub(offset)),
        (None, UnknownTimestampPolicy::Propagate) => None,
        (None, UnknownTimestampPolicy::Zero) => Some(0),
    }
}

/// Shift every packet of `snapshot` so the first one starts at zero.
///
/// Returns the offsets that were applied.
pub fn normalize_timestamps(
    snapshot: &mut Snapshot,
    policy: UnknownTimestampPolicy,
) -> TimestampOffsets {
    let offsets = TimestampOffsets::from_first(snapshot.first());
    for packet in snapshot.iter_mut() {
        offsets.apply(packet, policy);
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReplayBuffer;
    use crate::packet::Rational;

    fn snapshot_of(packets: Vec<EncodedPacket>) -> Snapshot {
        let buffer = ReplayBuffer::with_capacity(packets.len().max(1));
        for packet in packets {
            buffer.append(packet);
        }
        let mut snapshot = Snapshot::new();
        buffer.snapshot(&mut snapshot);
        snapshot
    }

    fn packet(pts: Option<i64>, dts: Option<i64>) -> EncodedPacket {
        EncodedPacket::new(vec![0], Rational::new(1, 30)).with_timestamps(pts, dts)
    }

    #[test]
    fn test_first_packet_starts_at_zero() {
        let mut snapshot = snapshot_of(vec![
            packet(Some(1002), Some(1000)),
            packet(Some(1005), Some(1001)),
            packet(Some(1003), Some(1002)),
        ]);

        let offsets = normalize_timestamps(&mut snapshot, UnknownTimestampPolicy::Propagate);

        assert_eq!(offsets, TimestampOffsets { pts: 1002, dts: 1000 });
        let ts: Vec<_> = snapshot.packets().iter().map(|p| (p.pts, p.dts)).collect();
        assert_eq!(
            ts,
            vec![(Some(0), Some(0)), (Some(3), Some(1)), (Some(1), Some(2))]
        );
    }

    #[test]
    fn test_reordered_pts_can_go_negative() {
        let mut snapshot = snapshot_of(vec![
            packet(Some(10), Some(8)),
            packet(Some(9), Some(9)),
        ]);

        normalize_timestamps(&mut snapshot, UnknownTimestampPolicy::Propagate);

        assert_eq!(snapshot.packets()[1].pts, Some(-1));
        assert_eq!(snapshot.packets()[1].dts, Some(1));
    }

    #[test]
    fn test_unknown_first_pts_uses_zero_offset() {
        let mut snapshot = snapshot_of(vec![packet(None, Some(500)), packet(Some(42), Some(501))]);

        let offsets = normalize_timestamps(&mut snapshot, UnknownTimestampPolicy::Propagate);

        assert_eq!(offsets, TimestampOffsets { pts: 0, dts: 500 });
        assert_eq!(snapshot.packets()[0].pts, None);
        assert_eq!(snapshot.packets()[1].pts, Some(42));
        assert_eq!(snapshot.packets()[1].dts, Some(1));
    }

    #[test]
    fn test_unknown_later_timestamps_policy() {
        let packets = vec![packet(Some(100), Some(100)), packet(None, None)];

        let mut propagated = snapshot_of(packets.clone());
        normalize_timestamps(&mut propagated, UnknownTimestampPolicy::Propagate);
        assert_eq!(propagated.packets()[1].pts, None);
        assert_eq!(propagated.packets()[1].dts, None);

        let mut zeroed = snapshot_of(packets);
        normalize_timestamps(&mut zeroed, UnknownTimestampPolicy::Zero);
        assert_eq!(zeroed.packets()[1].pts, Some(0));
        assert_eq!(zeroed.packets()[1].dts, Some(0));
    }

    #[test]
    fn test_empty_snapshot_is_noop() {
        let mut snapshot = Snapshot::new();
        let offsets = normalize_timestamps(&mut snapshot, UnknownTimestampPolicy::Propagate);
        assert_eq!(offsets, TimestampOffsets::default());
        assert!(snapshot.is_empty());
    }
}
