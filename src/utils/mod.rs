//! Shared utilities

pub mod clock;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AppError, AppResult, ErrorResponse};
