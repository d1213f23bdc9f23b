//! Replay service
//!
//! Owns the export pipeline, runs saves off the async runtime, rejects
//! overlapping saves and publishes save events. On Unix, `SIGUSR1`
//! triggers a save.

use crate::buffer::ReplayBuffer;
use crate::config::{ConfigError, ReplayConfig};
use crate::encoder::EncoderParameters;
use crate::export::{ExportError, ExportPipeline, ExportReport, FfmpegMuxerFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Events emitted around each save
#[derive(Debug, Clone)]
pub enum SaveEvent {
    /// A save began
    Started,
    /// The replay was written
    Saved(ExportReport),
    /// The save failed
    Failed(String),
}

/// Clears the saving flag when dropped, including on panic
struct SavingGuard(Arc<AtomicBool>);

impl SavingGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, ExportError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExportError::AlreadyExporting)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for SavingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReplayService {
    pipeline: Arc<ExportPipeline>,
    is_saving: Arc<AtomicBool>,
    event_tx: broadcast::Sender<SaveEvent>,
}

impl ReplayService {
    pub fn new(pipeline: ExportPipeline) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            pipeline: Arc::new(pipeline),
            is_saving: Arc::new(AtomicBool::new(false)),
            event_tx,
        }
    }

    /// Build the buffer and an FFmpeg-backed pipeline from `config`
    pub fn from_config(
        config: &ReplayConfig,
        encoder: Arc<dyn EncoderParameters>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffer = Arc::new(ReplayBuffer::with_capacity(config.buffer_capacity()));
        tracing::info!(
            "Replay window: {}s at {} fps ({} packets)",
            config.record_seconds,
            config.frame_rate,
            buffer.capacity()
        );

        let pipeline = ExportPipeline::new(
            buffer,
            encoder,
            config.path_template(),
            FfmpegMuxerFactory::new(config.ffmpeg_path.clone()),
        )
        .with_options(config.export_options());

        Ok(Self::new(pipeline))
    }

    /// The live buffer the encoder appends to
    pub fn buffer(&self) -> &Arc<ReplayBuffer> {
        self.pipeline.buffer()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_saving(&self) -> bool {
        self.is_saving.load(Ordering::Acquire)
    }

    /// Save on the calling thread
    pub fn save_now(&self) -> Result<ExportReport, ExportError> {
        let _guard = SavingGuard::acquire(&self.is_saving)?;
        run_export(&self.pipeline, &self.event_tx)
    }

    /// Save on the blocking thread pool
    pub async fn save(&self) -> Result<ExportReport, ExportError> {
        let guard = SavingGuard::acquire(&self.is_saving)?;
        let pipeline = self.pipeline.clone();
        let event_tx = self.event_tx.clone();

        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            run_export(&pipeline, &event_tx)
        })
        .await;

        match result {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Export task panicked: {}", e);
                let _ = self.event_tx.send(SaveEvent::Failed(format!(
                    "Export task panicked: {}",
                    e
                )));
                Err(ExportError::Panicked(e.to_string()))
            }
        }
    }

    /// Save on every `SIGUSR1` until Ctrl-C
    pub async fn run_until_shutdown(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let mut save_signal = signal(SignalKind::user_defined1())?;
            tracing::info!(
                "Ready: send SIGUSR1 to pid {} to save a replay",
                std::process::id()
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    received = save_signal.recv() => {
                        if received.is_none() {
                            break;
                        }
                        self.handle_trigger().await;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        tracing::info!("Shutting down replay service");
        Ok(())
    }

    #[cfg_attr(not(unix), allow(dead_code))]
    async fn handle_trigger(&self) {
        match self.save().await {
            Ok(_) => {}
            Err(ExportError::AlreadyExporting) => {
                tracing::warn!("Save requested while another save is running, ignoring")
            }
            // Already logged by the pipeline
            Err(_) => {}
        }
    }
}

fn run_export(
    pipeline: &ExportPipeline,
    event_tx: &broadcast::Sender<SaveEvent>,
) -> Result<ExportReport, ExportError> {
    // No subscribers is fine
    let _ = event_tx.send(SaveEvent::Started);

    let result = pipeline.export_replay();
    let event = match &result {
        Ok(report) => SaveEvent::Saved(report.clone()),
        Err(e) => SaveEvent::Failed(e.to_string()),
    };
    let _ = event_tx.send(event);

    result
}
