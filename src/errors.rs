// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the scanner

use std::time::Duration;
use thiserror::Error;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Top-level error type used by the CLI and configuration loading
#[derive(Debug, Error)]
pub enum AppError {
    /// Capture pipeline errors
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Image loading errors
    #[error("Image error: {0}")]
    Image(String),
    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the capture source lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// No usable device configuration; fatal, not retried internally
    #[error("Camera setup failed: {0}")]
    Setup(String),
    /// Exclusive device access could not be obtained in time
    #[error("Camera is locked by another user (waited {0:?})")]
    DeviceBusy(Duration),
    /// The processing worker did not exit in time and was leaked
    #[error("Processing worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),
    /// The capture source was already released
    #[error("Capture source has been released")]
    Released,
}

/// Single-frame detector failure
///
/// The processing loop logs these and moves on to the next frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Detection failed: {message}")]
pub struct DetectionError {
    pub message: String,
}

impl DetectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Image(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_converts_to_app_error() {
        let err: AppError = CaptureError::Setup("no sizes".into()).into();
        assert!(matches!(err, AppError::Capture(CaptureError::Setup(_))));
        assert_eq!(err.to_string(), "Capture error: Camera setup failed: no sizes");
    }

    #[test]
    fn test_device_busy_is_distinct_from_setup() {
        let busy = CaptureError::DeviceBusy(Duration::from_millis(2500));
        assert_ne!(busy, CaptureError::Setup(String::new()));
        assert!(busy.to_string().contains("locked"));
    }
}
