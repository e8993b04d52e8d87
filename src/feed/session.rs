//! Per-camera feed session
//!
//! A [`FeedSession`] owns one device handle and that feed's recording
//! controller. It has no timer of its own; the runner calls [`FeedSession::poll`]
//! from the scheduler.

use crate::capture::overlay::{burn_in, overlay_text, DEFAULT_FPS};
use crate::capture::{CaptureBackend, CaptureHandle, Frame};
use crate::recorder::{ChunkSinkFactory, RecordingController, RecordingError, RecordingEvent};
use crate::utils::Clock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// What the last poll saw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedStatus {
    /// A frame was read and published
    Live,
    /// No handle; the feed is closed or never opened
    NoFeed,
    /// The device did not deliver a frame this tick
    FrameGrabFailed,
    /// The device could not be opened
    OpenFailed,
}

/// Result of one poll
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub status: FeedStatus,
    pub frame: Option<Arc<Frame>>,
    pub recording: Option<RecordingEvent>,
}

impl PollOutcome {
    fn status(status: FeedStatus) -> Self {
        Self {
            status,
            frame: None,
            recording: None,
        }
    }
}

pub struct FeedSession {
    device_index: u32,
    label: String,
    enabled: bool,
    backend: Arc<dyn CaptureBackend>,
    handle: Option<Box<dyn CaptureHandle>>,
    recording: RecordingController,
    last_frame: Option<Arc<Frame>>,
}

impl FeedSession {
    pub fn new(
        device_index: u32,
        label: impl Into<String>,
        enabled: bool,
        backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn ChunkSinkFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device_index,
            label: label.into(),
            enabled,
            backend,
            handle: None,
            recording: RecordingController::new(device_index, sinks, clock),
            last_frame: None,
        }
    }

    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn recording(&self) -> &RecordingController {
        &self.recording
    }

    /// Latest overlaid frame
    pub fn last_frame(&self) -> Option<Arc<Frame>> {
        self.last_frame.clone()
    }

    /// Acquire the device. Opening an open feed is a no-op.
    pub fn open(&mut self) -> bool {
        if self.handle.is_some() {
            return true;
        }

        match self.backend.open(self.device_index) {
            Ok(handle) => {
                tracing::info!("Feed {} ({}) opened", self.device_index, self.label);
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                tracing::warn!("Feed {} ({}) failed to open: {}", self.device_index, self.label, e);
                false
            }
        }
    }

    /// Read one frame, overlay it and hand it to the recorder
    pub fn poll(&mut self) -> PollOutcome {
        let Some(handle) = self.handle.as_mut() else {
            return PollOutcome::status(FeedStatus::NoFeed);
        };

        let mut frame = match handle.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Feed {} frame grab failed: {}", self.device_index, e);
                let mut outcome = PollOutcome::status(FeedStatus::FrameGrabFailed);
                outcome.recording = self.recording.check_expiry();
                return outcome;
            }
        };

        let fps = handle.reported_fps().unwrap_or(DEFAULT_FPS);
        let text = overlay_text(&self.label, frame.width, frame.height, fps);
        burn_in(&mut frame, &text);

        let recording = self.recording.record_frame(&frame, fps);
        let frame = Arc::new(frame);
        self.last_frame = Some(frame.clone());

        PollOutcome {
            status: FeedStatus::Live,
            frame: Some(frame),
            recording,
        }
    }

    /// Finalize any recording and release the device. Safe to call more
    /// than once; the handle is released at most once.
    pub fn close(&mut self) -> Option<RecordingEvent> {
        let stopped = self.recording.stop();

        if let Some(mut handle) = self.handle.take() {
            handle.release();
            tracing::info!("Feed {} ({}) closed", self.device_index, self.label);
        }
        self.last_frame = None;

        stopped
    }

    /// Change the overlay label. Persisting it is up to the caller.
    pub fn edit_label(&mut self, new_label: impl Into<String>) {
        self.label = new_label.into();
    }

    pub fn start_recording(
        &mut self,
        save_dir: &Path,
        chunk_minutes: u32,
        max_minutes: u32,
    ) -> Result<Option<RecordingEvent>, RecordingError> {
        if self.handle.is_none() {
            return Err(RecordingError::FeedNotOpen);
        }
        self.recording.start(save_dir, chunk_minutes, max_minutes)
    }

    pub fn stop_recording(&mut self) -> Option<RecordingEvent> {
        self.recording.stop()
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.close();
    }
}
