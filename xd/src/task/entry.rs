//! Persistent record of one finished task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::TransferConfiguration;
use crate::error::TransferError;
use crate::task::info::TaskInformation;
use crate::task::measurement::TaskMeasurement;

/// Failure classification carried into history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Protocol,
    Timeout,
    Disconnected,
    Io,
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TaskOutcome {
    Succeeded,
    Cancelled,
    Failed { kind: FailureKind, message: String },
}

impl TaskOutcome {
    pub fn from_error(err: &TransferError) -> Self {
        let kind = match err {
            TransferError::Cancelled => return TaskOutcome::Cancelled,
            TransferError::Protocol(_) | TransferError::UnexpectedEof => FailureKind::Protocol,
            TransferError::Timeout(_) => FailureKind::Timeout,
            TransferError::Disconnected(_) => FailureKind::Disconnected,
            TransferError::Io(_) => FailureKind::Io,
        };
        TaskOutcome::Failed {
            kind,
            message: err.to_string(),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Succeeded => f.write_str("succeeded"),
            TaskOutcome::Cancelled => f.write_str("cancelled"),
            TaskOutcome::Failed { message, .. } => write!(f, "failed: {message}"),
        }
    }
}

/// One row of task history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub input_read: u64,
    pub output_written: u64,
    pub configuration: TransferConfiguration,
    pub measurements: BTreeMap<String, TaskMeasurement>,
    pub outcome: TaskOutcome,
}

impl TaskEntry {
    pub fn from_information(
        info: &TaskInformation,
        measurements: BTreeMap<String, TaskMeasurement>,
        outcome: TaskOutcome,
    ) -> Self {
        Self {
            name: info.name.clone(),
            started_at: info.started_at,
            duration_ms: info.elapsed().as_millis() as u64,
            input_read: info.input_read,
            output_written: info.output_written,
            configuration: info.configuration,
            measurements,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn outcomes_classify_errors() {
        assert_eq!(
            TaskOutcome::from_error(&TransferError::Cancelled),
            TaskOutcome::Cancelled
        );
        assert!(matches!(
            TaskOutcome::from_error(&TransferError::Timeout(Duration::from_secs(5))),
            TaskOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        ));
        assert!(matches!(
            TaskOutcome::from_error(&TransferError::UnexpectedEof),
            TaskOutcome::Failed {
                kind: FailureKind::Protocol,
                ..
            }
        ));
    }

    #[test]
    fn entries_roundtrip_through_json() {
        let info = TaskInformation::started("single", TransferConfiguration::default())
            .with_input_read(1024)
            .with_output_written(1024)
            .ended(None);
        let entry = TaskEntry::from_information(&info, BTreeMap::new(), TaskOutcome::Succeeded);

        let json = serde_json::to_string(&entry).unwrap();
        let back: TaskEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
