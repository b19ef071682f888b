//! Immutable progress snapshots. Every update produces a new value,
//! so observers can hold a snapshot without locking the task.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::TransferConfiguration;

#[derive(Debug, Clone)]
pub struct TaskInformation {
    pub name: String,
    pub configuration: TransferConfiguration,
    pub started_at: DateTime<Utc>,
    pub input_read: u64,
    pub output_written: u64,
    /// Set once the task ends; `None` while it is still running.
    pub duration: Option<std::time::Duration>,
    /// Terminal error message, when the task ended badly.
    pub error: Option<String>,
    started: Instant,
}

impl TaskInformation {
    pub fn started(name: impl Into<String>, configuration: TransferConfiguration) -> Self {
        Self {
            name: name.into(),
            configuration,
            started_at: Utc::now(),
            input_read: 0,
            output_written: 0,
            duration: None,
            error: None,
            started: Instant::now(),
        }
    }

    pub fn with_configuration(mut self, configuration: TransferConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_input_read(mut self, bytes: u64) -> Self {
        self.input_read += bytes;
        self
    }

    pub fn with_output_written(mut self, bytes: u64) -> Self {
        self.output_written += bytes;
        self
    }

    /// Freezes the snapshot at end of task, fixing its duration.
    pub fn ended(mut self, error: Option<String>) -> Self {
        debug_assert!(self.duration.is_none(), "task already ended");
        self.duration = Some(self.started.elapsed());
        self.error = error;
        self
    }

    pub fn is_ended(&self) -> bool {
        self.duration.is_some()
    }

    /// Final duration for ended tasks, wall time so far otherwise.
    pub fn elapsed(&self) -> std::time::Duration {
        self.duration.unwrap_or_else(|| self.started.elapsed())
    }
}
