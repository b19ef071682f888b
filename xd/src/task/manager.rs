//! Task admission and bookkeeping: at most one started task, history
//! of everything that terminated, observable progress and history.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain::{TaskCode, TransferConfiguration};
use crate::error::AdmissionError;
use crate::task::core::TaskHandle;
use crate::task::entry::TaskEntry;
use crate::task::factory::TaskFactory;
use crate::task::history::HistorySaver;
use crate::task::info::TaskInformation;

#[derive(Default)]
struct Inner {
    active: Option<TaskHandle>,
    history: Vec<TaskEntry>,
}

pub struct TaskManager {
    factory: TaskFactory,
    saver: HistorySaver,
    inner: Mutex<Inner>,
    history_tx: watch::Sender<Vec<TaskEntry>>,
    info_tx: watch::Sender<Option<TaskInformation>>,
}

impl TaskManager {
    /// Creates the manager and loads persisted history.
    pub fn new(factory: TaskFactory, saver: HistorySaver) -> Arc<Self> {
        let history = saver.load();
        info!(entries = history.len(), "task history loaded");
        Arc::new(Self {
            factory,
            saver,
            history_tx: watch::channel(history.clone()).0,
            info_tx: watch::channel(None).0,
            inner: Mutex::new(Inner {
                active: None,
                history,
            }),
        })
    }

    /// Creates and triggers a task for `code`. Fails with
    /// `ConcurrentTask` while another task is active; the active slot
    /// is cleared before the previous task's terminal outcome resolves,
    /// so a caller that waited on a task can always start the next one.
    pub fn start_task(
        self: &Arc<Self>,
        code: TaskCode,
        configuration: TransferConfiguration,
    ) -> Result<TaskHandle, AdmissionError> {
        configuration
            .validate()
            .map_err(AdmissionError::InvalidConfiguration)?;

        let task = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(active) = &inner.active {
                return Err(AdmissionError::ConcurrentTask(active.name().to_string()));
            }
            let mut task = self.factory.create(code, configuration);
            let manager = Arc::clone(self);
            task.set_termination_observer(move |entry| manager.on_task_terminated(entry));
            inner.active = Some(task.handle());
            task
        };

        debug!(task = %code, "starting task");
        let handle = task.trigger();
        self.forward_information(handle.clone());
        Ok(handle)
    }

    /// Forwards the active task's cancellation; `NoTaskRunning` when
    /// the slot is empty.
    pub fn cancel_task(&self) -> Result<TaskHandle, AdmissionError> {
        let inner = self.inner.lock().unwrap();
        inner
            .active
            .clone()
            .ok_or(AdmissionError::NoTaskRunning)
    }

    pub fn active_task(&self) -> Option<TaskHandle> {
        self.inner.lock().unwrap().active.clone()
    }

    pub fn history(&self) -> Vec<TaskEntry> {
        self.inner.lock().unwrap().history.clone()
    }

    pub fn subscribe_history(&self) -> watch::Receiver<Vec<TaskEntry>> {
        self.history_tx.subscribe()
    }

    pub fn subscribe_information(&self) -> watch::Receiver<Option<TaskInformation>> {
        self.info_tx.subscribe()
    }

    /// Empties the history, in memory and on disk.
    pub fn clear_history(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.history.clear();
        self.history_tx.send_replace(Vec::new());
        self.saver.save(Vec::new());
    }

    /// Waits for any in-flight history write to land.
    pub async fn flush_history(&self) {
        self.saver.flush().await;
    }

    /// Runs on the task's own runner before its terminal watch
    /// resolves: append to history, clear the active slot, schedule the
    /// save.
    fn on_task_terminated(&self, entry: TaskEntry) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.history.push(entry);
            inner.active = None;
            inner.history.clone()
        };
        self.history_tx.send_replace(snapshot.clone());
        self.saver.save(snapshot);
    }

    /// Mirrors the task's progress snapshots onto the manager-level
    /// watch until the task terminates.
    fn forward_information(&self, handle: TaskHandle) {
        let info_tx = self.info_tx.clone();
        tokio::spawn(async move {
            let mut info_rx = handle.subscribe_information();
            loop {
                info_tx.send_replace(info_rx.borrow_and_update().clone());
                tokio::select! {
                    changed = info_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = handle.wait_terminal() => break,
                }
            }
            info_tx.send_replace(None);
        });
    }
}
