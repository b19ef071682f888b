//! History persistence with coalesced writes.
//!
//! Saves are fire-and-forget. While one write is in flight, newer
//! snapshots overwrite a single pending slot instead of queueing, so a
//! burst of N saves costs at most two writes and the file always ends
//! on the newest snapshot. Persistence failures are logged and never
//! fail a task.

use histstore::{JsonStore, StoreError};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

use crate::task::entry::TaskEntry;

/// Destination for history snapshots. The blanket store implementation
/// writes JSON; tests substitute counting sinks.
pub trait EntrySink: Send + Sync + 'static {
    fn read(&self) -> Result<Vec<TaskEntry>, StoreError>;
    fn write(&self, entries: &[TaskEntry]) -> Result<(), StoreError>;
}

impl EntrySink for JsonStore<TaskEntry> {
    fn read(&self) -> Result<Vec<TaskEntry>, StoreError> {
        self.load()
    }

    fn write(&self, entries: &[TaskEntry]) -> Result<(), StoreError> {
        self.save(entries)
    }
}

#[derive(Debug, Default)]
struct SaveState {
    saving: bool,
    pending: Option<Vec<TaskEntry>>,
}

#[derive(Clone)]
pub struct HistorySaver {
    sink: Arc<dyn EntrySink>,
    state: Arc<Mutex<SaveState>>,
    idle: Arc<Notify>,
}

impl HistorySaver {
    pub fn new(sink: impl EntrySink) -> Self {
        Self {
            sink: Arc::new(sink),
            state: Arc::new(Mutex::new(SaveState::default())),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Loads the persisted history. A missing or unreadable file is an
    /// empty history, with a warning for the unreadable case.
    pub fn load(&self) -> Vec<TaskEntry> {
        match self.sink.read() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "could not load task history, starting empty");
                Vec::new()
            }
        }
    }

    /// Schedules `entries` to be written. Returns immediately; if a
    /// write is already in flight the snapshot parks in the pending
    /// slot, displacing any older parked snapshot.
    pub fn save(&self, entries: Vec<TaskEntry>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.saving {
                state.pending = Some(entries);
                return;
            }
            state.saving = true;
        }
        self.spawn_writer(entries);
    }

    fn spawn_writer(&self, entries: Vec<TaskEntry>) {
        let saver = self.clone();
        tokio::spawn(async move {
            let mut snapshot = entries;
            loop {
                let sink = saver.sink.clone();
                let batch = std::mem::take(&mut snapshot);
                let result =
                    tokio::task::spawn_blocking(move || sink.write(&batch)).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "failed to persist task history"),
                    Err(err) => warn!(error = %err, "history writer panicked"),
                }
                {
                    let mut state = saver.state.lock().unwrap();
                    match state.pending.take() {
                        Some(next) => snapshot = next,
                        None => {
                            state.saving = false;
                            break;
                        }
                    }
                }
            }
            saver.idle.notify_waiters();
        });
    }

    /// Waits until no write is in flight or parked. Used at shutdown so
    /// the final snapshot reaches disk.
    pub async fn flush(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock().unwrap();
                if !state.saving && state.pending.is_none() {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSink {
        writes: AtomicUsize,
        delay: Duration,
        last: Mutex<Vec<TaskEntry>>,
    }

    impl CountingSink {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                writes: AtomicUsize::new(0),
                delay,
                last: Mutex::new(Vec::new()),
            })
        }
    }

    impl EntrySink for Arc<CountingSink> {
        fn read(&self) -> Result<Vec<TaskEntry>, StoreError> {
            Ok(self.last.lock().unwrap().clone())
        }

        fn write(&self, entries: &[TaskEntry]) -> Result<(), StoreError> {
            std::thread::sleep(self.delay);
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = entries.to_vec();
            Ok(())
        }
    }

    fn entries(n: usize) -> Vec<TaskEntry> {
        use crate::domain::TransferConfiguration;
        use crate::task::entry::TaskOutcome;
        use crate::task::info::TaskInformation;
        (0..n)
            .map(|_| {
                let info =
                    TaskInformation::started("single", TransferConfiguration::default()).ended(None);
                TaskEntry::from_information(&info, Default::default(), TaskOutcome::Succeeded)
            })
            .collect()
    }

    #[tokio::test]
    async fn rapid_saves_coalesce_into_at_most_two_writes() {
        let sink = CountingSink::new(Duration::from_millis(50));
        let saver = HistorySaver::new(sink.clone());

        for n in 1..=5 {
            saver.save(entries(n));
        }
        saver.flush().await;

        let writes = sink.writes.load(Ordering::SeqCst);
        assert!(writes <= 2, "expected at most 2 writes, saw {writes}");
        // the last write carries the newest snapshot
        assert_eq!(sink.last.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn sequential_saves_each_reach_the_sink() {
        let sink = CountingSink::new(Duration::ZERO);
        let saver = HistorySaver::new(sink.clone());

        for n in 1..=3 {
            saver.save(entries(n));
            saver.flush().await;
        }
        assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn load_survives_a_failing_sink() {
        struct BrokenSink;
        impl EntrySink for BrokenSink {
            fn read(&self) -> Result<Vec<TaskEntry>, StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk on fire")))
            }
            fn write(&self, _entries: &[TaskEntry]) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk on fire")))
            }
        }

        let saver = HistorySaver::new(BrokenSink);
        assert!(saver.load().is_empty());
        saver.save(entries(1));
        saver.flush().await;
    }
}
