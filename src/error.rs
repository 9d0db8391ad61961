//! Custom error types for the acquisition pipeline.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent way to report the
//! failures that can escape the pipeline, from configuration problems to
//! hardware stalls.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and semantic
//!   validation failures of an otherwise well-formed configuration.
//! - **`Io`** / **`Serial`**: transport failures of the serial detector or the
//!   motor controller bus.
//! - **`Camera`** / **`Motor`**: failures reported by the hardware collaborators.
//! - **`CalibrationFailed`** / **`NotCalibrated`**: the trigger threshold could not
//!   be derived, or acquisition was requested before calibration.
//! - **`Timeout`**: a bounded wait expired because the camera or the detector
//!   stopped producing data.
//!
//! Transient input noise (malformed serial lines) and frame overruns are not
//! represented here: they are recovered locally and only logged.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Pipeline stage a bounded wait belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the generator signal to start a new cycle.
    Trigger,
    /// Waiting for the frame batch to fill.
    Frames,
    /// Waiting for the detector trace to fill.
    DeviceTrace,
    /// Waiting for a motor to report motion done.
    Motion,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Trigger => "trigger",
            Stage::Frames => "frame capture",
            Stage::DeviceTrace => "device trace",
            Stage::Motion => "motion",
        };
        f.write_str(name)
    }
}

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(String),

    #[error("Serial port not connected")]
    SerialPortNotConnected,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Motor controller error: {0}")]
    Motor(String),

    #[error("Calibration failed: no valid generator sample among {samples_seen} ({rejected} rejected as outliers)")]
    CalibrationFailed { samples_seen: u64, rejected: u64 },

    #[error("Trigger threshold not calibrated")]
    NotCalibrated,

    #[error("Timed out after {after:?} waiting for {stage}")]
    Timeout { stage: Stage, after: Duration },

    #[error("Frame batch expected {expected} frames, got {frames} frames and {intensities} intensities")]
    InvalidBatch {
        expected: usize,
        frames: usize,
        intensities: usize,
    },

    #[error("Sample stream cancelled")]
    Cancelled,

    #[error("Acquisition worker failed: {0}")]
    Worker(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

#[cfg(feature = "instrument_serial")]
impl From<serialport::Error> for DaqError {
    fn from(value: serialport::Error) -> Self {
        DaqError::Serial(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Camera("delivery thread died".to_string());
        assert_eq!(err.to_string(), "Camera error: delivery thread died");
    }

    #[test]
    fn test_timeout_names_stage() {
        let err = DaqError::Timeout {
            stage: Stage::Trigger,
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Timed out after 250ms waiting for trigger");
    }

    #[test]
    fn test_calibration_failure_reports_counts() {
        let err = DaqError::CalibrationFailed {
            samples_seen: 12,
            rejected: 12,
        };
        let text = err.to_string();
        assert!(text.contains("12"));
        assert!(text.contains("outliers"));
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::Camera("stop timeout".into()),
            DaqError::SerialPortNotConnected,
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
    }
}
