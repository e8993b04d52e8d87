//! Recording state management
//!
//! Defines the per-feed recording state, the active session and the events a
//! recording emits.

use super::sink::ChunkSink;
use crate::utils::ErrorResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Current state of a feed's recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
}

/// Why a recording session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// `stop_recording` was called
    Requested,
    /// The session reached `max_minutes`
    SessionLimit,
    /// A chunk could not be written or rotated
    Failed { error: ErrorResponse },
}

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordingEvent {
    Started { path: PathBuf },
    ChunkRotated { sequence: u32, path: PathBuf },
    Stopped { reason: StopReason, chunks: usize },
}

/// An active recording on one feed
///
/// Owned by the feed's controller and dropped when the session ends.
pub struct RecordingSession {
    pub feed_index: u32,
    pub save_directory: PathBuf,
    pub chunk_minutes: u32,
    pub max_minutes: u32,
    /// Wall-clock start, used for chunk names
    pub session_start_time: DateTime<Utc>,
    pub chunk_start_time: DateTime<Utc>,
    /// Monotonic starts (see [`Clock::elapsed`](crate::utils::Clock::elapsed)),
    /// used for rotation and the cap
    pub session_started: Duration,
    pub chunk_started: Duration,
    /// Sequence number of the open chunk, starting at 1
    pub current_chunk_sequence: u32,
    /// Every chunk opened so far, in order
    pub chunks: Vec<PathBuf>,
    pub(super) writer: Option<Box<dyn ChunkSink>>,
}

impl RecordingSession {
    pub fn session_elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.session_started)
    }

    pub fn chunk_elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.chunk_started)
    }

    /// Session reached its cap
    pub fn is_expired(&self, now: Duration) -> bool {
        self.session_elapsed(now) >= minutes(self.max_minutes)
    }

    /// The open chunk is full and the next frame goes to a new one
    pub fn chunk_due(&self, now: Duration) -> bool {
        self.chunk_elapsed(now) >= minutes(self.chunk_minutes)
    }
}

fn minutes(count: u32) -> Duration {
    Duration::from_secs(u64::from(count) * 60)
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("feed_index", &self.feed_index)
            .field("save_directory", &self.save_directory)
            .field("chunk_minutes", &self.chunk_minutes)
            .field("max_minutes", &self.max_minutes)
            .field("session_start_time", &self.session_start_time)
            .field("chunk_start_time", &self.chunk_start_time)
            .field("current_chunk_sequence", &self.current_chunk_sequence)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}
