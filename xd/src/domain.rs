//! Core domain types shared across the daemon: transfer configuration,
//! task codes, and the request unit handed from admission to the worker.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::protocol::PIPE_CAPACITY;

/// Default number of bytes the producer emits per transfer.
pub const DEFAULT_PRODUCER_DATA_SIZE: u32 = 128 * 1024;
/// Default pause before the producer writes each record.
pub const DEFAULT_PRODUCER_INTERVAL_MS: u64 = 50;
/// Default size of each producer record.
pub const DEFAULT_PRODUCER_CHUNK_SIZE: u32 = 64 * 1024;
/// Default size of the copy buffer between producer and consumer pipes.
pub const DEFAULT_TRANSFER_BUFFER_SIZE: u32 = 8 * 1024;
/// Default pause before the consumer drains each chunk.
pub const DEFAULT_CONSUMER_INTERVAL_MS: u64 = 50;
/// Default size of each consumer drain.
pub const DEFAULT_CONSUMER_BUFFER_SIZE: u32 = 32 * 1024;

/// Knobs for a single transfer run.
///
/// Sizes are bytes, intervals are milliseconds. A configuration is
/// validated once at admission time; workers and tasks trust it after
/// that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfiguration {
    pub producer_data_size: u32,
    pub producer_interval_ms: u64,
    pub producer_chunk_size: u32,
    pub transfer_buffer_size: u32,
    pub consumer_interval_ms: u64,
    pub consumer_buffer_size: u32,
}

impl Default for TransferConfiguration {
    fn default() -> Self {
        Self {
            producer_data_size: DEFAULT_PRODUCER_DATA_SIZE,
            producer_interval_ms: DEFAULT_PRODUCER_INTERVAL_MS,
            producer_chunk_size: DEFAULT_PRODUCER_CHUNK_SIZE,
            transfer_buffer_size: DEFAULT_TRANSFER_BUFFER_SIZE,
            consumer_interval_ms: DEFAULT_CONSUMER_INTERVAL_MS,
            consumer_buffer_size: DEFAULT_CONSUMER_BUFFER_SIZE,
        }
    }
}

impl TransferConfiguration {
    /// Checks the configuration for values that would wedge or crash a
    /// transfer before it is accepted into the system.
    pub fn validate(&self) -> Result<(), String> {
        if self.producer_data_size > 0 && self.producer_chunk_size == 0 {
            return Err("producer chunk size must be positive when data size is positive".into());
        }
        if self.transfer_buffer_size == 0 {
            return Err("transfer buffer size must be positive".into());
        }
        if self.transfer_buffer_size as usize > PIPE_CAPACITY {
            return Err(format!(
                "transfer buffer size {} exceeds pipe capacity {}",
                self.transfer_buffer_size, PIPE_CAPACITY
            ));
        }
        if self.consumer_buffer_size == 0 {
            return Err("consumer buffer size must be positive".into());
        }
        Ok(())
    }

    pub fn producer_interval(&self) -> Duration {
        Duration::from_millis(self.producer_interval_ms)
    }

    pub fn consumer_interval(&self) -> Duration {
        Duration::from_millis(self.consumer_interval_ms)
    }
}

impl fmt::Display for TransferConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "produce {} B in {} B records every {} ms, copy {} B at a time, drain {} B every {} ms",
            self.producer_data_size,
            self.producer_chunk_size,
            self.producer_interval_ms,
            self.transfer_buffer_size,
            self.consumer_buffer_size,
            self.consumer_interval_ms
        )
    }
}

/// Which transfer variant a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCode {
    /// One execution context moves producer records straight to the consumer.
    Single,
    /// A reader and a writer run concurrently, decoupled by a relay pipe.
    Multi,
}

impl TaskCode {
    pub fn name(&self) -> &'static str {
        match self {
            TaskCode::Single => "single",
            TaskCode::Multi => "multi",
        }
    }
}

impl fmt::Display for TaskCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One admitted unit of work, queued on a worker until dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub code: TaskCode,
    pub configuration: TransferConfiguration,
}

impl TransferRequest {
    pub fn new(code: TaskCode, configuration: TransferConfiguration) -> Self {
        Self { code, configuration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert!(TransferConfiguration::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_chunk_with_data() {
        let config = TransferConfiguration {
            producer_chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_zero_chunk_without_data() {
        let config = TransferConfiguration {
            producer_data_size: 0,
            producer_chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_buffer_larger_than_pipe() {
        let config = TransferConfiguration {
            transfer_buffer_size: PIPE_CAPACITY as u32 + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn task_codes_render_lowercase() {
        assert_eq!(TaskCode::Single.to_string(), "single");
        assert_eq!(TaskCode::Multi.to_string(), "multi");
    }
}
