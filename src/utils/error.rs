//! Error types and handling
//!
//! Common error types used across the application. Each subsystem keeps its
//! own error enum; `AppError` folds them together for callers that span
//! several subsystems.

use crate::capture::CaptureError;
use crate::recorder::RecordingError;
use crate::settings::SettingsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Error payload pushed to observers of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Settings(_) => "SETTINGS_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<RecordingError> for ErrorResponse {
    fn from(error: RecordingError) -> Self {
        AppError::from(error).into()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
