//! The transfer manager: admission front door and worker lifecycle.
//!
//! All public entry points funnel through a single-slot admission
//! gate, so at any moment at most one request is being admitted. A
//! worker exists only while there is work: the first request cold
//! starts one, and the worker stops itself through a two-phase
//! handshake that holds the gate exclusively, which is what makes the
//! stop decision race-free against concurrent admissions.

mod gate;

pub use gate::{AdmissionGate, AdmissionPermit};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::{TaskCode, TransferConfiguration, TransferRequest};
use crate::error::{AdmissionError, CancelError};
use crate::task::TaskManager;
use crate::worker::Worker;

/// Sequence numbering starts here so a fresh system has a well-defined
/// "latest" of `FIRST_SEQ - 1`.
const FIRST_SEQ: u64 = 1;

pub struct TransferManager {
    gate: AdmissionGate,
    tasks: Arc<TaskManager>,
    idle_timeout: Duration,
    worker: Mutex<Option<Arc<Worker>>>,
    next_seq: AtomicU64,
    next_worker_id: AtomicU64,
    stopping: Mutex<bool>,
    queue_tx: watch::Sender<Vec<TransferRequest>>,
    throughput_tx: watch::Sender<Option<f64>>,
}

impl TransferManager {
    pub fn new(tasks: Arc<TaskManager>, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            gate: AdmissionGate::new(),
            tasks,
            idle_timeout,
            worker: Mutex::new(None),
            next_seq: AtomicU64::new(FIRST_SEQ),
            next_worker_id: AtomicU64::new(0),
            stopping: Mutex::new(false),
            queue_tx: watch::channel(Vec::new()).0,
            throughput_tx: watch::channel(None).0,
        })
    }

    /// Admits one transfer request. Hands it to the live worker, or
    /// cold starts one and retries. The retry loop is what makes
    /// admission lossless against a worker that stops concurrently:
    /// either the submit lands before the stop handshake sees it, or
    /// the handshake wins and the next iteration starts a fresh worker.
    pub async fn enqueue_transfer(
        self: &Arc<Self>,
        code: TaskCode,
        configuration: TransferConfiguration,
    ) -> Result<(), AdmissionError> {
        configuration
            .validate()
            .map_err(AdmissionError::InvalidConfiguration)?;
        let request = TransferRequest::new(code, configuration);
        loop {
            {
                let _permit = self.gate.admit().await;
                let worker = self.worker.lock().unwrap().clone();
                if let Some(worker) = worker {
                    let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                    worker.submit(request.clone(), seq);
                    debug!(seq, code = %code, "request admitted");
                    return Ok(());
                }
            }
            self.cold_start().await;
        }
    }

    /// Cancels the running task and waits for its terminal outcome.
    pub async fn cancel_transfer(&self) -> Result<Result<(), CancelError>, AdmissionError> {
        let handle = {
            let _permit = self.gate.admit().await;
            self.tasks.cancel_task()?
        };
        Ok(handle.cancel().await)
    }

    /// Drops all queued, not yet dispatched requests.
    pub async fn clear_queue(&self) {
        let _permit = self.gate.admit().await;
        if let Some(worker) = self.worker.lock().unwrap().clone() {
            worker.clear_queue();
        }
    }

    /// Empties the task history.
    pub async fn clear_history(&self) {
        let _permit = self.gate.admit().await;
        self.tasks.clear_history();
    }

    /// Queue contents, surviving worker turnover: empty when no worker
    /// is alive.
    pub fn subscribe_queue(&self) -> watch::Receiver<Vec<TransferRequest>> {
        self.queue_tx.subscribe()
    }

    /// Tasks-per-minute of the most recent dispatch. Sticky across
    /// worker turnover.
    pub fn subscribe_throughput(&self) -> watch::Receiver<Option<f64>> {
        self.throughput_tx.subscribe()
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    /// Spawns and registers a worker if none exists. Registration runs
    /// under the exclusive gate so it cannot interleave with a stop
    /// handshake.
    async fn cold_start(self: &Arc<Self>) {
        self.gate.begin_exclusive().await;
        {
            let mut slot = self.worker.lock().unwrap();
            if slot.is_none() {
                let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
                let created_seq = self.next_seq.load(Ordering::SeqCst) - 1;
                let worker = Worker::new(id, self.idle_timeout, created_seq);
                *slot = Some(worker.clone());
                drop(slot);
                info!(worker = id, "cold starting worker");
                self.forward_views(&worker);
                tokio::spawn(worker.run(Arc::clone(self), Arc::clone(&self.tasks)));
            }
        }
        self.gate.end_exclusive();
    }

    /// First phase of the stop handshake. Holds the gate exclusively
    /// and grants the stop only if `last_handled` is still the latest
    /// admitted sequence. On a grant the gate stays held until
    /// [`finish_stop`](Self::finish_stop).
    pub(crate) async fn try_begin_stop(&self, last_handled: u64) -> bool {
        self.gate.begin_exclusive().await;
        let latest = self.next_seq.load(Ordering::SeqCst) - 1;
        if last_handled != latest {
            self.gate.end_exclusive();
            return false;
        }
        let mut stopping = self.stopping.lock().unwrap();
        debug_assert!(!*stopping, "overlapping stop handshakes");
        *stopping = true;
        true
    }

    /// Second phase: deregisters the worker when the stop went through,
    /// then reopens the gate.
    pub(crate) fn finish_stop(&self, stopped: bool) {
        {
            let mut stopping = self.stopping.lock().unwrap();
            if !*stopping {
                warn!("finish_stop without a begun handshake");
                return;
            }
            *stopping = false;
        }
        if stopped {
            *self.worker.lock().unwrap() = None;
        }
        self.gate.end_exclusive();
    }

    /// Final deregistration on worker exit. Identity-checked so a
    /// stale worker tearing down late cannot evict its successor.
    pub(crate) async fn on_worker_destroyed(&self, worker_id: u64) {
        self.gate.begin_exclusive().await;
        {
            let mut slot = self.worker.lock().unwrap();
            if slot.as_ref().is_some_and(|w| w.id() == worker_id) {
                *slot = None;
            }
        }
        self.gate.end_exclusive();
    }

    /// Mirrors the worker's queue and throughput watches onto the
    /// manager-level ones until the worker goes away.
    fn forward_views(&self, worker: &Arc<Worker>) {
        let queue_tx = self.queue_tx.clone();
        let mut queue_rx = worker.subscribe_queue();
        tokio::spawn(async move {
            loop {
                queue_tx.send_replace(queue_rx.borrow_and_update().clone());
                if queue_rx.changed().await.is_err() {
                    break;
                }
            }
            queue_tx.send_replace(Vec::new());
        });

        let throughput_tx = self.throughput_tx.clone();
        let mut throughput_rx = worker.subscribe_throughput();
        tokio::spawn(async move {
            loop {
                if let Some(value) = *throughput_rx.borrow_and_update() {
                    throughput_tx.send_replace(Some(value));
                }
                if throughput_rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LocalConnector;
    use crate::task::history::EntrySink;
    use crate::task::{HistorySaver, TaskEntry, TaskFactory};
    use histstore::StoreError;
    use tokio::time::{sleep, timeout};

    struct MemorySink(Mutex<Vec<TaskEntry>>);

    impl EntrySink for Arc<MemorySink> {
        fn read(&self) -> Result<Vec<TaskEntry>, StoreError> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn write(&self, entries: &[TaskEntry]) -> Result<(), StoreError> {
            *self.0.lock().unwrap() = entries.to_vec();
            Ok(())
        }
    }

    fn system(idle_timeout: Duration) -> Arc<TransferManager> {
        let sink = Arc::new(MemorySink(Mutex::new(Vec::new())));
        let factory = TaskFactory::new(Arc::new(LocalConnector::new()), Duration::from_secs(10));
        let tasks = TaskManager::new(factory, HistorySaver::new(sink));
        TransferManager::new(tasks, idle_timeout)
    }

    fn quick_config() -> TransferConfiguration {
        TransferConfiguration {
            producer_data_size: 2 * 1024,
            producer_interval_ms: 0,
            producer_chunk_size: 1024,
            consumer_interval_ms: 0,
            ..Default::default()
        }
    }

    async fn wait_for_history(manager: &TransferManager, count: usize) {
        let mut rx = manager.task_manager().subscribe_history();
        timeout(Duration::from_secs(20), async {
            while rx.borrow_and_update().len() < count {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("history never reached expected length");
    }

    #[tokio::test]
    async fn first_request_cold_starts_a_worker_and_runs() {
        let manager = system(Duration::from_millis(100));
        manager
            .enqueue_transfer(TaskCode::Single, quick_config())
            .await
            .unwrap();
        wait_for_history(&manager, 1).await;
        let history = manager.task_manager().history();
        assert!(history[0].outcome.succeeded());
        assert_eq!(history[0].input_read, 2 * 1024);
        assert_eq!(history[0].output_written, 2 * 1024);
    }

    #[tokio::test]
    async fn invalid_configuration_never_reaches_a_worker() {
        let manager = system(Duration::from_millis(50));
        let config = TransferConfiguration {
            consumer_buffer_size: 0,
            ..Default::default()
        };
        let err = manager
            .enqueue_transfer(TaskCode::Single, config)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn requests_survive_worker_turnover() {
        // short idle window forces the worker to stop between requests
        let manager = system(Duration::from_millis(10));
        for round in 1..=4 {
            manager
                .enqueue_transfer(TaskCode::Single, quick_config())
                .await
                .unwrap();
            wait_for_history(&manager, round).await;
            sleep(Duration::from_millis(40)).await;
        }
        assert_eq!(manager.task_manager().history().len(), 4);
    }

    #[tokio::test]
    async fn cancel_without_a_task_reports_no_task_running() {
        let manager = system(Duration::from_millis(50));
        let err = manager.cancel_transfer().await.unwrap_err();
        assert_eq!(err, AdmissionError::NoTaskRunning);
    }

    #[tokio::test]
    async fn cancelling_a_paced_transfer_sticks() {
        let manager = system(Duration::from_millis(500));
        let slow = TransferConfiguration {
            producer_data_size: 64 * 1024,
            producer_chunk_size: 1024,
            producer_interval_ms: 20,
            consumer_interval_ms: 0,
            ..Default::default()
        };
        manager
            .enqueue_transfer(TaskCode::Single, slow)
            .await
            .unwrap();
        // wait until the task is actually running
        timeout(Duration::from_secs(5), async {
            while manager.task_manager().active_task().is_none() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(50)).await;

        manager.cancel_transfer().await.unwrap().unwrap();
        wait_for_history(&manager, 1).await;
        assert!(manager.task_manager().history()[0].outcome.is_cancelled());
    }

    #[tokio::test]
    async fn cleared_queue_drops_pending_requests() {
        let manager = system(Duration::from_millis(200));
        let slow = TransferConfiguration {
            producer_data_size: 32 * 1024,
            producer_chunk_size: 1024,
            producer_interval_ms: 10,
            consumer_interval_ms: 0,
            ..Default::default()
        };
        // first request occupies the worker, the rest queue up
        for _ in 0..3 {
            manager.enqueue_transfer(TaskCode::Single, slow).await.unwrap();
        }
        manager.clear_queue().await;
        manager.cancel_transfer().await.unwrap().ok();
        wait_for_history(&manager, 1).await;
        sleep(Duration::from_millis(300)).await;
        // only the dispatched request ever ran
        assert_eq!(manager.task_manager().history().len(), 1);
    }
}
