//! The dispatch worker: one loop that drains the request queue in FIFO
//! order, runs each task to completion, and tears itself down when it
//! has handled the latest admitted request or sat idle too long.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::future::BoxFuture;
use tokio::sync::{watch, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::domain::TransferRequest;
use crate::error::AdmissionError;
use crate::manager::TransferManager;
use crate::task::TaskManager;

#[derive(Debug, Clone)]
struct QueuedRequest {
    seq: u64,
    request: TransferRequest,
}

/// A single dispatch loop plus its request queue. Created by the
/// transfer manager on cold start; destroys itself via the stop
/// handshake.
pub struct Worker {
    id: u64,
    idle_timeout: Duration,
    /// Sequence baseline: the latest sequence considered handled by a
    /// worker that has not dispatched anything yet.
    created_seq: u64,
    queue: Mutex<VecDeque<QueuedRequest>>,
    /// Highest sequence dropped by a queue clear. Cleared requests are
    /// never dispatched, so the stop baseline must skip past them or
    /// the worker could never satisfy the handshake again.
    cleared_through: AtomicU64,
    notify: Notify,
    queue_tx: watch::Sender<Vec<TransferRequest>>,
    throughput_tx: watch::Sender<Option<f64>>,
}

impl Worker {
    pub fn new(id: u64, idle_timeout: Duration, created_seq: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            idle_timeout,
            created_seq,
            queue: Mutex::new(VecDeque::new()),
            cleared_through: AtomicU64::new(0),
            notify: Notify::new(),
            queue_tx: watch::channel(Vec::new()).0,
            throughput_tx: watch::channel(None).0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Appends an admitted request. Called under the admission gate, so
    /// submissions are serialized and FIFO order is the admission
    /// order.
    pub fn submit(&self, request: TransferRequest, seq: u64) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(QueuedRequest { seq, request });
        self.publish_queue(&queue);
        drop(queue);
        self.notify.notify_one();
    }

    /// Drops every request not yet dispatched.
    pub fn clear_queue(&self) {
        let mut queue = self.queue.lock().unwrap();
        let dropped = queue.len();
        if let Some(last) = queue.back() {
            self.cleared_through.fetch_max(last.seq, Ordering::SeqCst);
        }
        queue.clear();
        self.publish_queue(&queue);
        drop(queue);
        if dropped > 0 {
            info!(worker = self.id, dropped, "queue cleared");
        }
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<Vec<TransferRequest>> {
        self.queue_tx.subscribe()
    }

    pub fn subscribe_throughput(&self) -> watch::Receiver<Option<f64>> {
        self.throughput_tx.subscribe()
    }

    fn publish_queue(&self, queue: &VecDeque<QueuedRequest>) {
        self.queue_tx
            .send_replace(queue.iter().map(|q| q.request.clone()).collect());
    }

    /// Pops the next request, waiting up to the idle timeout. `None`
    /// means the worker sat idle for the full window.
    async fn dequeue(&self) -> Option<QueuedRequest> {
        let deadline = Instant::now() + self.idle_timeout;
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                if let Some(next) = queue.pop_front() {
                    self.publish_queue(&queue);
                    return Some(next);
                }
            }
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return None;
            }
        }
    }

    /// The dispatch loop. Exits through the stop handshake, or
    /// immediately on a fatal dispatch error; either way the worker
    /// deregisters and resubmits any leftover requests.
    pub fn run(
        self: Arc<Self>,
        manager: Arc<TransferManager>,
        tasks: Arc<TaskManager>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
        info!(worker = self.id, "worker started");
        let mut last_handled = self.created_seq;
        loop {
            match self.dequeue().await {
                Some(QueuedRequest { seq, request }) => {
                    debug!(worker = self.id, seq, code = %request.code, "dispatching");
                    let started = Instant::now();
                    let handle = match tasks.start_task(request.code, request.configuration) {
                        Ok(handle) => handle,
                        Err(err @ AdmissionError::ConcurrentTask(_)) => {
                            // the worker is the only dispatcher; a busy
                            // slot here means the serial contract broke
                            error!(worker = self.id, error = %err, "dispatch failed, worker exiting");
                            break;
                        }
                        Err(err) => {
                            warn!(worker = self.id, seq, error = %err, "dropping request");
                            last_handled = seq;
                            continue;
                        }
                    };
                    let entry = handle.wait_terminal().await;
                    debug!(worker = self.id, seq, outcome = %entry.outcome, "task done");
                    let elapsed_ms = started.elapsed().as_millis().max(1) as f64;
                    self.throughput_tx.send_replace(Some(60_000.0 / elapsed_ms));
                    last_handled = seq;
                    if self.try_stop(&manager, last_handled).await {
                        break;
                    }
                }
                None => {
                    if self.try_stop(&manager, last_handled).await {
                        break;
                    }
                }
            }
        }
        self.destroy(&manager).await;
        })
    }

    /// Runs the stop handshake. Granted only when everything admitted
    /// so far has been dispatched or dropped by a queue clear.
    async fn try_stop(&self, manager: &TransferManager, last_handled: u64) -> bool {
        let baseline = last_handled.max(self.cleared_through.load(Ordering::SeqCst));
        if manager.try_begin_stop(baseline).await {
            manager.finish_stop(true);
            info!(worker = self.id, "worker stopping");
            true
        } else {
            false
        }
    }

    /// Deregisters, then routes any leftover requests back through
    /// normal admission so a successor worker picks them up.
    async fn destroy(&self, manager: &Arc<TransferManager>) {
        manager.on_worker_destroyed(self.id).await;
        let leftovers: Vec<TransferRequest> = {
            let mut queue = self.queue.lock().unwrap();
            let drained = queue.drain(..).map(|q| q.request).collect();
            self.publish_queue(&queue);
            drained
        };
        if !leftovers.is_empty() {
            info!(
                worker = self.id,
                leftover = leftovers.len(),
                "resubmitting undispatched requests"
            );
        }
        for request in leftovers {
            if let Err(err) = manager
                .enqueue_transfer(request.code, request.configuration)
                .await
            {
                warn!(worker = self.id, error = %err, "could not resubmit leftover request");
            }
        }
        info!(worker = self.id, "worker destroyed");
    }
}
