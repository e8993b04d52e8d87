//! Per-feed recording controller
//!
//! Splits one feed's frames into chunk files and enforces the session cap.
//! Rotation is lazy: the next chunk is opened by the first frame that arrives
//! after the current one is full, so a chunk file always has frames in it.

use super::sink::{
    prepare_chunk_path, ChunkInfo, ChunkSinkFactory, RecordingError, RecordingResult,
};
use super::state::{RecordingEvent, RecordingSession, RecordingState, StopReason};
use crate::capture::Frame;
use crate::utils::{Clock, ErrorResponse};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct RecordingController {
    feed_index: u32,
    sinks: Arc<dyn ChunkSinkFactory>,
    clock: Arc<dyn Clock>,
    session: Option<RecordingSession>,
}

impl RecordingController {
    pub fn new(feed_index: u32, sinks: Arc<dyn ChunkSinkFactory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            feed_index,
            sinks,
            clock,
            session: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        if self.session.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Begin a session and open chunk 1. Returns `Ok(None)` when already
    /// recording.
    pub fn start(
        &mut self,
        save_dir: &Path,
        chunk_minutes: u32,
        max_minutes: u32,
    ) -> RecordingResult<Option<RecordingEvent>> {
        if self.session.is_some() {
            tracing::debug!("Feed {} is already recording", self.feed_index);
            return Ok(None);
        }

        self.sinks.preflight()?;

        let now = self.clock.now();
        let started = self.clock.elapsed();
        let path = prepare_chunk_path(save_dir, self.feed_index, now, 1, self.sinks.extension())?;
        let writer = self.sinks.create(&path)?;

        let session = RecordingSession {
            feed_index: self.feed_index,
            save_directory: save_dir.to_path_buf(),
            chunk_minutes: chunk_minutes.max(1),
            max_minutes: max_minutes.max(1),
            session_start_time: now,
            chunk_start_time: now,
            session_started: started,
            chunk_started: started,
            current_chunk_sequence: 1,
            chunks: vec![path.clone()],
            writer: Some(writer),
        };

        tracing::info!(
            "Feed {} recording started ({} min chunks, {} min cap): {:?}",
            self.feed_index,
            session.chunk_minutes,
            session.max_minutes,
            path
        );
        self.session = Some(session);

        Ok(Some(RecordingEvent::Started { path }))
    }

    /// Feed one overlaid frame into the session.
    ///
    /// Checks the cap first (an expired session is stopped and the frame
    /// dropped), then rotates if the chunk is full, then writes. A write or
    /// rotation failure ends the session.
    pub fn record_frame(&mut self, frame: &Frame, fps: u32) -> Option<RecordingEvent> {
        let now = self.clock.elapsed();
        let (expired, chunk_due) = match &self.session {
            Some(session) => (session.is_expired(now), session.chunk_due(now)),
            None => return None,
        };

        if expired {
            return self.finish(StopReason::SessionLimit);
        }

        let mut event = None;
        if chunk_due {
            match self.rotate() {
                Ok(rotated) => event = Some(rotated),
                Err(e) => return self.fail(e),
            }
        }

        let written = match self.session.as_mut().and_then(|s| s.writer.as_mut()) {
            Some(writer) => writer.write_frame(frame, fps),
            None => Ok(()),
        };
        if let Err(e) = written {
            return self.fail(e);
        }

        event
    }

    /// Stop the session if it has reached its cap. Used on ticks without a
    /// frame.
    pub fn check_expiry(&mut self) -> Option<RecordingEvent> {
        let now = self.clock.elapsed();
        let expired = self.session.as_ref()?.is_expired(now);
        if expired {
            self.finish(StopReason::SessionLimit)
        } else {
            None
        }
    }

    /// Flush and close the open chunk. No-op when idle.
    pub fn stop(&mut self) -> Option<RecordingEvent> {
        self.finish(StopReason::Requested)
    }

    fn rotate(&mut self) -> RecordingResult<RecordingEvent> {
        let now = self.clock.now();
        let started = self.clock.elapsed();
        let extension = self.sinks.extension();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| RecordingError::Encoder("No active session".to_string()))?;

        if let Some(previous) = session.writer.take() {
            forget_if_empty(&mut session.chunks, previous.finish()?);
        }

        let sequence = session.current_chunk_sequence + 1;
        let path = prepare_chunk_path(
            &session.save_directory,
            session.feed_index,
            session.session_start_time,
            sequence,
            extension,
        )?;
        session.writer = Some(self.sinks.create(&path)?);
        session.current_chunk_sequence = sequence;
        session.chunk_start_time = now;
        session.chunk_started = started;
        session.chunks.push(path.clone());

        tracing::info!("Feed {} rotated to chunk {}: {:?}", self.feed_index, sequence, path);
        Ok(RecordingEvent::ChunkRotated { sequence, path })
    }

    fn fail(&mut self, error: RecordingError) -> Option<RecordingEvent> {
        tracing::error!("Feed {} recording failed: {}", self.feed_index, error);
        self.finish(StopReason::Failed {
            error: ErrorResponse::from(error),
        })
    }

    fn finish(&mut self, reason: StopReason) -> Option<RecordingEvent> {
        let mut session = self.session.take()?;

        if let Some(writer) = session.writer.take() {
            match writer.finish() {
                Ok(info) => forget_if_empty(&mut session.chunks, info),
                Err(e) => tracing::warn!("Feed {} failed to finalize chunk: {}", self.feed_index, e),
            }
        }

        let elapsed = session.session_elapsed(self.clock.elapsed());
        tracing::info!(
            "Feed {} recording stopped ({:?}) after {}s, {} chunk(s)",
            self.feed_index,
            reason,
            elapsed.as_secs(),
            session.chunks.len()
        );

        Some(RecordingEvent::Stopped {
            reason,
            chunks: session.chunks.len(),
        })
    }

    /// Paths of every chunk in the active session
    pub fn chunk_paths(&self) -> Vec<PathBuf> {
        self.session
            .as_ref()
            .map(|s| s.chunks.clone())
            .unwrap_or_default()
    }
}

/// Sinks delete a chunk that never received a frame
fn forget_if_empty(chunks: &mut Vec<PathBuf>, info: ChunkInfo) {
    if info.frames == 0 {
        chunks.retain(|path| *path != info.path);
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.stop();
    }
}
