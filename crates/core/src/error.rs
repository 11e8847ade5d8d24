//! # Error Taxonomy
//!
//! Only [`ScanError`] ever unwinds the orchestrator. Everything else is
//! absorbed where it happens and surfaces through logs and the per-detector
//! outcome map.

use std::time::Duration;

/// Fatal run-level errors, propagated to the caller
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The mandatory summarization step failed
    #[error("Mandatory pre-processing failed: {0}")]
    Preprocess(#[source] anyhow::Error),

    /// The overall wall-clock budget for the run expired
    #[error("Scan exceeded its time budget of {0:?}")]
    Timeout(Duration),

    /// The run was aborted through the command channel
    #[error("Scan aborted")]
    Aborted,

    /// The capability map enabled no runnable detector
    #[error("No detectors are enabled for this scan")]
    NoDetectors,
}

/// A single detector invocation failed
///
/// Recorded as `TaskOutcome::Failure` and never propagated. Cloneable because a
/// failed chunk records the same error for every instance it contained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    #[error("Detector execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Detector returned no result for instance {0}")]
    MissingOutput(String),

    #[error("Detector task panicked: {0}")]
    Panicked(String),

    #[error("Detector task was cancelled")]
    Cancelled,
}

impl DetectorError {
    /// Wrap any error raised by an external detector
    pub fn execution(err: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed(err.to_string())
    }
}

/// Errors raised by the progress tracker
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("Unknown detector: {0}")]
    UnknownDetector(String),
}

/// Non-fatal errors collected while cancelling outstanding tasks
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("Task {task} panicked while being cancelled: {message}")]
    Panicked { task: String, message: String },
}
