//! Recording system module
//!
//! Per-feed chunked recording:
//! - RecordingController owns a feed's session, rotation and cap
//! - ChunkSink/ChunkSinkFactory abstract the container
//! - FFmpeg (MP4) and built-in YUV4MPEG2 sinks

pub mod controller;
pub mod ffmpeg;
pub mod sink;
pub mod state;
pub mod y4m;

pub use controller::RecordingController;
pub use sink::{
    ChunkInfo, ChunkSink, ChunkSinkFactory, RecordingError, RecordingFormat, RecordingResult,
};
pub use state::{RecordingEvent, RecordingSession, RecordingState, StopReason};
