//! Chunk writers
//!
//! A chunk sink receives the overlaid frames of one chunk and turns them into
//! a file. Sinks are created through a [`ChunkSinkFactory`] so the recording
//! controller does not care which container is in use.

use super::ffmpeg::FfmpegSinkFactory;
use super::y4m::Y4mSinkFactory;
use crate::capture::{Frame, Resolution};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Recording-related errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Feed is not open")]
    FeedNotOpen,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Frame size changed from {expected} to {actual}")]
    FrameSizeChanged {
        expected: Resolution,
        actual: Resolution,
    },
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// A finished chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub path: PathBuf,
    pub frames: u64,
}

/// Writes the frames of one chunk
pub trait ChunkSink: Send {
    fn path(&self) -> &Path;

    /// Append a frame. `fps` is only used by sinks that set up their stream
    /// on the first frame.
    fn write_frame(&mut self, frame: &Frame, fps: u32) -> RecordingResult<()>;

    /// Flush and close the chunk. A chunk that never received a frame is
    /// deleted, and its info reports zero frames.
    fn finish(self: Box<Self>) -> RecordingResult<ChunkInfo>;
}

/// Creates chunk sinks for one container format
pub trait ChunkSinkFactory: Send + Sync {
    /// File extension, without the dot
    fn extension(&self) -> &'static str;

    /// Checked once when a recording starts
    fn preflight(&self) -> RecordingResult<()> {
        Ok(())
    }

    fn create(&self, path: &Path) -> RecordingResult<Box<dyn ChunkSink>>;
}

/// Container used for recorded chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    /// H.264 in MP4, encoded by an FFmpeg subprocess
    #[default]
    Mp4,
    /// Uncompressed YUV4MPEG2, written in-process
    Y4m,
}

impl RecordingFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingFormat::Mp4 => "mp4",
            RecordingFormat::Y4m => "y4m",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp4" => Some(RecordingFormat::Mp4),
            "y4m" => Some(RecordingFormat::Y4m),
            _ => None,
        }
    }

    pub fn sink_factory(&self) -> Arc<dyn ChunkSinkFactory> {
        match self {
            RecordingFormat::Mp4 => Arc::new(FfmpegSinkFactory::default()),
            RecordingFormat::Y4m => Arc::new(Y4mSinkFactory),
        }
    }
}

/// File name for one chunk, without directory or collision suffix:
/// `cam<index>_<YYYYmmdd-HHMMSS-mmm>_part<NNN>`
pub fn chunk_stem(feed_index: u32, session_start: DateTime<Utc>, sequence: u32) -> String {
    let local = session_start.with_timezone(&Local);
    format!(
        "cam{}_{}_part{:03}",
        feed_index,
        local.format("%Y%m%d-%H%M%S-%3f"),
        sequence
    )
}

/// Pick a path for a new chunk under `save_dir/<date>/` and create the
/// directory. An existing file is never reused; a `-N` suffix is added
/// instead.
pub fn prepare_chunk_path(
    save_dir: &Path,
    feed_index: u32,
    session_start: DateTime<Utc>,
    sequence: u32,
    extension: &str,
) -> RecordingResult<PathBuf> {
    let day = session_start.with_timezone(&Local).format("%Y-%m-%d").to_string();
    let dir = save_dir.join(day);
    std::fs::create_dir_all(&dir)?;

    let stem = chunk_stem(feed_index, session_start, sequence);
    let mut candidate = dir.join(format!("{stem}.{extension}"));
    let mut suffix = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}-{suffix}.{extension}"));
        suffix += 1;
    }

    Ok(candidate)
}

/// Delete a chunk file that was reserved but never written to
pub(super) fn remove_empty_chunk(path: &Path) -> RecordingResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed empty chunk {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_chunk_stem_encodes_device_and_sequence() {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let stem = chunk_stem(2, start, 7);

        assert!(stem.starts_with("cam2_"));
        assert!(stem.ends_with("_part007"));
    }

    #[test]
    fn test_prepare_chunk_path_never_reuses_a_file() {
        let dir = tempdir().unwrap();
        let start = Utc::now();

        let first = prepare_chunk_path(dir.path(), 0, start, 1, "y4m").unwrap();
        std::fs::write(&first, b"taken").unwrap();
        let second = prepare_chunk_path(dir.path(), 0, start, 1, "y4m").unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-1.y4m"));
        assert_eq!(first.parent(), second.parent());
    }

    #[test]
    fn test_recording_format_parse() {
        assert_eq!(RecordingFormat::parse("MP4"), Some(RecordingFormat::Mp4));
        assert_eq!(RecordingFormat::parse("y4m"), Some(RecordingFormat::Y4m));
        assert_eq!(RecordingFormat::parse("avi"), None);
    }
}
