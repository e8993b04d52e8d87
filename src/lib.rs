//! SoloSight - local multi-camera monitoring and chunked recording.
//!
//! This is the main library crate. It provides the capture engine (device
//! discovery, per-feed polling with burned-in overlay, chunked recording,
//! persisted settings) and a headless runner used by the binary.

pub mod capture;
pub mod feed;
pub mod monitor;
pub mod recorder;
pub mod scheduler;
pub mod settings;
pub mod utils;

use capture::NokhwaBackend;
use feed::{FeedEvent, FeedEventKind};
use monitor::MonitorCoordinator;
use scheduler::{Scheduler, DEFAULT_RESOLUTION};
use settings::SettingsStore;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::{Clock, SystemClock};

/// Command-line options for the headless runner
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Start recording every open feed right after discovery
    pub record: bool,
}

/// Install the tracing subscriber (`RUST_LOG` overrides the default filter)
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solosight=debug,solosight_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Discover cameras, run the feeds until Ctrl-C, then shut down cleanly
pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    tracing::info!("Starting SoloSight v{}", env!("CARGO_PKG_VERSION"));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let scheduler = Scheduler::new(clock.clone());
    let store = SettingsStore::from_env();
    tracing::info!("Using settings file {:?}", store.path());

    let (stop_tx, stop_rx) = watch::channel(false);
    let driver = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(DEFAULT_RESOLUTION, stop_rx).await })
    };

    // probing opens devices, which blocks
    let mut monitor = tokio::task::spawn_blocking(move || {
        let mut monitor = MonitorCoordinator::new(Arc::new(NokhwaBackend), clock, scheduler, store);
        monitor.detect_and_build();
        monitor
    })
    .await?;

    let logger = tokio::spawn(log_events(monitor.subscribe()));

    if monitor.settings().show_welcome {
        tracing::info!(
            "Welcome to SoloSight: {} camera(s) visible, recordings go to {:?}",
            monitor.visible().len(),
            monitor.settings().save_path
        );
    }

    if options.record {
        let recording = monitor.start_recording_all();
        tracing::info!("Recording on {} feed(s)", recording);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    let saved = tokio::task::spawn_blocking(move || monitor.shutdown()).await?;
    if let Err(e) = saved {
        tracing::warn!("Failed to save settings on shutdown: {}", e);
    }

    let _ = stop_tx.send(true);
    driver.await?;
    logger.abort();

    tracing::info!("SoloSight stopped");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<FeedEvent>) {
    loop {
        match events.recv().await {
            Ok(FeedEvent { device_index, kind }) => match kind {
                FeedEventKind::Status(status) => {
                    tracing::info!("Camera {} status: {:?}", device_index, status)
                }
                FeedEventKind::Recording(event) => {
                    tracing::info!("Camera {} recording: {:?}", device_index, event)
                }
                FeedEventKind::Frame(frame) => {
                    tracing::trace!("Camera {} frame {}x{}", device_index, frame.width, frame.height)
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Event log skipped {} feed events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
