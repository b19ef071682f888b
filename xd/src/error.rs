//! Error taxonomy for admission, transfers, and cancellation.

use std::time::Duration;
use thiserror::Error;

/// Why a transfer run failed or stopped early.
///
/// Cloneable so terminal snapshots can carry the error out of the task
/// without giving up the original.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("stream ended before the frame terminator")]
    UnexpectedEof,

    #[error("transfer exceeded its deadline after {0:?}")]
    Timeout(Duration),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("peer disconnected: {0}")]
    Disconnected(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

/// Errors surfaced by the admission front door.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("task '{0}' is already running")]
    ConcurrentTask(String),

    #[error("no task is running")]
    NoTaskRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Outcome of a cancellation request that did not stick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("cancellation lost: task completed successfully")]
    CompletedAnyway,

    #[error("cancellation lost: task failed: {message}")]
    TaskFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_with_message() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let converted = TransferError::from(err);
        assert!(matches!(converted, TransferError::Io(ref m) if m.contains("pipe closed")));
    }

    #[test]
    fn admission_errors_name_the_offender() {
        let err = AdmissionError::ConcurrentTask("single".into());
        assert!(err.to_string().contains("single"));
    }
}
