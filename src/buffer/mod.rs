//! Replay window buffer
//!
//! A bounded, lock-protected ring of the most recent encoded packets,
//! plus the detached snapshot the export path works on.

mod ring;
mod snapshot;

pub use ring::{window_capacity, ReplayBuffer};
pub use snapshot::Snapshot;
