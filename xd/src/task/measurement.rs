//! Latency measurement. Tasks time individual operations with
//! stopwatches; at termination the raw nanosecond samples collapse
//! into per-label aggregates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Stopwatch label for reads from the producer pipe.
pub const LABEL_READ: &str = "read";
/// Stopwatch label for writes to the consumer pipe.
pub const LABEL_WRITE: &str = "write";
/// Stopwatch label for the consumer notification round trip.
pub const LABEL_NOTIFY: &str = "notify-consumer";

/// Aggregate of one label's samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeasurement {
    pub count: u64,
    pub sum_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub std_deviation_ns: f64,
}

impl TaskMeasurement {
    /// Collapses raw nanosecond samples. Standard deviation is over the
    /// full population of samples, not a sample estimate.
    pub fn from_samples(samples: &[u64]) -> Self {
        debug_assert!(!samples.is_empty());
        let count = samples.len() as u64;
        let sum_ns: u64 = samples.iter().sum();
        let min_ns = samples.iter().copied().min().unwrap_or(0);
        let max_ns = samples.iter().copied().max().unwrap_or(0);
        let mean = sum_ns as f64 / count as f64;
        let variance = samples
            .iter()
            .map(|&s| {
                let diff = s as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;
        Self {
            count,
            sum_ns,
            min_ns,
            max_ns,
            std_deviation_ns: variance.sqrt(),
        }
    }

    pub fn average_ns(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_ns as f64 / self.count as f64
    }
}

/// Accumulates samples from concurrent operations within one task.
#[derive(Debug, Default)]
pub struct MeasurementRecorder {
    samples: Mutex<BTreeMap<String, Vec<u64>>>,
}

impl MeasurementRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: &str, elapsed: Duration) {
        let mut samples = self.samples.lock().unwrap();
        samples
            .entry(label.to_string())
            .or_default()
            .push(elapsed.as_nanos() as u64);
    }

    /// Starts timing one operation under `label`.
    pub fn stopwatch<'a>(&'a self, label: &'a str) -> Stopwatch<'a> {
        Stopwatch {
            recorder: self,
            label,
            started: Instant::now(),
        }
    }

    /// Aggregates everything recorded so far, keyed by label.
    pub fn aggregate(&self) -> BTreeMap<String, TaskMeasurement> {
        let samples = self.samples.lock().unwrap();
        samples
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(label, v)| (label.clone(), TaskMeasurement::from_samples(v)))
            .collect()
    }
}

/// A running timer. Only `stop` records a sample; a dropped stopwatch
/// records nothing.
#[derive(Debug)]
pub struct Stopwatch<'a> {
    recorder: &'a MeasurementRecorder,
    label: &'a str,
    started: Instant,
}

impl Stopwatch<'_> {
    pub fn stop(self) {
        self.recorder.record(self.label, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_basic_statistics() {
        let m = TaskMeasurement::from_samples(&[2, 4, 4, 4, 5, 5, 7, 9]);
        assert_eq!(m.count, 8);
        assert_eq!(m.sum_ns, 40);
        assert_eq!(m.min_ns, 2);
        assert_eq!(m.max_ns, 9);
        assert_eq!(m.average_ns(), 5.0);
        // population standard deviation of this classic sample set is exactly 2
        assert!((m.std_deviation_ns - 2.0).abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_deviation() {
        let m = TaskMeasurement::from_samples(&[1_000]);
        assert_eq!(m.count, 1);
        assert_eq!(m.std_deviation_ns, 0.0);
    }

    #[test]
    fn recorder_groups_by_label() {
        let recorder = MeasurementRecorder::new();
        recorder.record(LABEL_READ, Duration::from_nanos(10));
        recorder.record(LABEL_READ, Duration::from_nanos(30));
        recorder.record(LABEL_WRITE, Duration::from_nanos(5));

        let aggregated = recorder.aggregate();
        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated[LABEL_READ].count, 2);
        assert_eq!(aggregated[LABEL_READ].sum_ns, 40);
        assert_eq!(aggregated[LABEL_WRITE].count, 1);
    }

    #[test]
    fn dropped_stopwatch_records_nothing() {
        let recorder = MeasurementRecorder::new();
        drop(recorder.stopwatch(LABEL_NOTIFY));
        assert!(recorder.aggregate().is_empty());
    }
}
