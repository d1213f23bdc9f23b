//! Encoded packet types
//!
//! Compressed video units as they come out of the encoder, and the
//! rational time-base their timestamps are expressed in.

mod encoded;
mod rational;

pub use encoded::EncodedPacket;
pub use rational::Rational;
