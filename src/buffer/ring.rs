//! Fixed-capacity packet ring shared by the encoder and the export path

use super::Snapshot;
use crate::packet::EncodedPacket;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Ring state guarded by the buffer lock
struct PacketRing {
    packets: VecDeque<EncodedPacket>,
    retained_bytes: usize,
}

/// Bounded window of the most recent encoded packets.
///
/// One producer appends continuously; an export takes a snapshot from
/// another thread. Both operations hold the same lock for their whole
/// critical section, so a snapshot sees each append entirely or not at all.
/// Once full, every append evicts the oldest packet first.
pub struct ReplayBuffer {
    ring: Mutex<PacketRing>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Create a buffer holding at most `capacity` packets
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be at least 1");
        Self {
            ring: Mutex::new(PacketRing {
                packets: VecDeque::with_capacity(capacity),
                retained_bytes: 0,
            }),
            capacity,
        }
    }

    /// Create a buffer sized for `seconds` of video at `fps` frames per second
    pub fn for_window(seconds: u32, fps: u32) -> Self {
        Self::with_capacity(window_capacity(seconds, fps))
    }

    /// Maximum number of retained packets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of packets currently retained
    pub fn len(&self) -> usize {
        self.ring.lock().packets.len()
    }

    /// Whether no packet has been retained yet
    pub fn is_empty(&self) -> bool {
        self.ring.lock().packets.is_empty()
    }

    /// Payload bytes currently retained
    pub fn retained_bytes(&self) -> usize {
        self.ring.lock().retained_bytes
    }

    /// Store `packet` as the newest entry, evicting the oldest when full
    pub fn append(&self, packet: EncodedPacket) {
        let mut ring = self.ring.lock();
        if ring.packets.len() == self.capacity {
            if let Some(evicted) = ring.packets.pop_front() {
                ring.retained_bytes -= evicted.size();
            }
        }
        ring.retained_bytes += packet.size();
        ring.packets.push_back(packet);
    }

    /// Copy every retained packet, oldest first, into `dest`.
    ///
    /// Previous contents of `dest` are discarded. Payloads are copied, so
    /// `dest` is unaffected by later appends.
    pub fn snapshot(&self, dest: &mut Snapshot) {
        let ring = self.ring.lock();
        dest.fill(ring.packets.iter());
    }
}

impl std::fmt::Debug for ReplayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("ReplayBuffer")
            .field("capacity", &self.capacity)
            .field("len", &ring.packets.len())
            .field("retained_bytes", &ring.retained_bytes)
            .finish()
    }
}

/// Number of packets needed to hold `seconds` of video at `fps`
pub fn window_capacity(seconds: u32, fps: u32) -> usize {
    (seconds as usize * fps as usize).max(1)
}
