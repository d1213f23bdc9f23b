//! Instant replay - keep the last seconds of video, save them on demand.
//!
//! An encoder appends compressed packets to a bounded [`ReplayBuffer`].
//! When a save is triggered, the [`ExportPipeline`] snapshots the buffer,
//! shifts timestamps to start at zero and remuxes the packets into a
//! fast-start MP4 without re-encoding.

pub mod buffer;
pub mod config;
pub mod encoder;
pub mod export;
pub mod packet;
pub mod path;
pub mod service;
pub mod utils;

pub use buffer::{ReplayBuffer, Snapshot};
pub use config::ReplayConfig;
pub use encoder::{CodecParameters, EncoderParameters, VideoCodec};
pub use export::{ExportError, ExportPipeline, ExportReport};
pub use packet::{EncodedPacket, Rational};
pub use path::{OutputPathResolver, PathTemplate};
pub use service::{ReplayService, SaveEvent};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `filter`; without either, `instant_replay=info`
/// is used. Calling this again after a subscriber is set does nothing.
pub fn init_tracing(filter: Option<&str>) {
    let fallback = filter.unwrap_or(config::DEFAULT_LOG_FILTER).to_string();

    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Starting instant replay v{}", env!("CARGO_PKG_VERSION"));
    }
}
