//! Detached copy of the replay window

use crate::packet::EncodedPacket;

/// An independently owned, oldest-to-newest copy of the buffer contents.
///
/// Filled by [`ReplayBuffer::snapshot`](super::ReplayBuffer::snapshot);
/// mutating it never affects the live buffer.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    packets: Vec<EncodedPacket>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty snapshot with room for `capacity` packets
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packets: Vec::with_capacity(capacity),
        }
    }

    /// Number of packets
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether the snapshot holds no packets
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Packets, oldest first
    pub fn packets(&self) -> &[EncodedPacket] {
        &self.packets
    }

    /// First (oldest) packet
    pub fn first(&self) -> Option<&EncodedPacket> {
        self.packets.first()
    }

    /// Mutable iteration, oldest first
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, EncodedPacket> {
        self.packets.iter_mut()
    }

    /// Total payload bytes
    pub fn payload_bytes(&self) -> usize {
        self.packets.iter().map(EncodedPacket::size).sum()
    }

    /// Release every packet payload
    pub fn clear(&mut self) {
        self.packets.clear();
        self.packets.shrink_to_fit();
    }

    /// Take ownership of the packets
    pub fn into_packets(self) -> Vec<EncodedPacket> {
        self.packets
    }

    /// Replace the contents with clones of `packets`
    pub(super) fn fill<'a, I>(&mut self, packets: I)
    where
        I: IntoIterator<Item = &'a EncodedPacket>,
    {
        self.packets.clear();
        self.packets.extend(packets.into_iter().cloned());
    }
}
