//! Live camera feeds
//!
//! [`FeedSession`] is the engine: device handle, overlay and recording.
//! [`Feed`] drives a session from the scheduler and publishes events.

pub mod runner;
pub mod session;

pub use runner::{event_channel, Feed, FeedEvent, FeedEventKind};
pub use session::{FeedSession, FeedStatus, PollOutcome};
