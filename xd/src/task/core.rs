//! Task lifecycle: trigger, cooperative cancellation, termination.
//!
//! A [`TransferTask`] pairs a shared [`TaskCore`] with a
//! [`TaskBehavior`] that does the actual byte moving. Triggering
//! consumes the task, so a task can only ever run once. The core owns
//! the progress and terminal watch channels; everything else observes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use crate::domain::TransferConfiguration;
use crate::error::{CancelError, TransferError};
use crate::task::entry::{TaskEntry, TaskOutcome};
use crate::task::info::TaskInformation;
use crate::task::measurement::{MeasurementRecorder, Stopwatch};

/// The byte-moving half of a task. `run` drives the transfer to
/// completion; the hooks let variants react to lifecycle events.
#[async_trait]
pub trait TaskBehavior: Send + Sync + 'static {
    async fn run(&self, ctl: TaskController) -> Result<(), TransferError>;

    /// Invoked on the canceller's side when cancellation is requested.
    /// The default marks the private cancel flag so a clean finish is
    /// still reported as cancelled.
    fn on_cancel(&self, ctl: &TaskController) {
        ctl.set_private_cancel();
    }

    /// Invoked after `run` returns, before the terminal outcome is
    /// published.
    fn on_stop(&self, _ctl: &TaskController) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Initialized,
    Started,
    Terminal,
}

/// Shared lifecycle state, behind an `Arc`.
#[derive(Debug)]
pub struct TaskCore {
    name: String,
    configuration: TransferConfiguration,
    timeout: Duration,
    state: Mutex<TaskState>,
    deadline: OnceLock<Instant>,
    cancel_requested: AtomicBool,
    private_cancel: AtomicBool,
    recorder: MeasurementRecorder,
    info_tx: watch::Sender<Option<TaskInformation>>,
    terminal_tx: watch::Sender<Option<TaskEntry>>,
}

impl TaskCore {
    fn new(name: String, configuration: TransferConfiguration, timeout: Duration) -> Self {
        Self {
            name,
            configuration,
            timeout,
            state: Mutex::new(TaskState::Initialized),
            deadline: OnceLock::new(),
            cancel_requested: AtomicBool::new(false),
            private_cancel: AtomicBool::new(false),
            recorder: MeasurementRecorder::new(),
            info_tx: watch::channel(None).0,
            terminal_tx: watch::channel(None).0,
        }
    }

    fn update_info(&self, update: impl FnOnce(TaskInformation) -> TaskInformation) {
        self.info_tx.send_modify(|slot| {
            if let Some(info) = slot.take() {
                *slot = Some(update(info));
            }
        });
    }

    /// Builds the terminal entry and freezes the progress snapshot.
    fn seal(&self, outcome: &TaskOutcome) -> TaskEntry {
        {
            let mut state = self.state.lock().unwrap();
            debug_assert_eq!(*state, TaskState::Started);
            *state = TaskState::Terminal;
        }
        let error = match outcome {
            TaskOutcome::Succeeded => None,
            TaskOutcome::Cancelled => Some(TransferError::Cancelled.to_string()),
            TaskOutcome::Failed { message, .. } => Some(message.clone()),
        };
        self.update_info(|info| info.ended(error));
        let info = self
            .info_tx
            .borrow()
            .clone()
            .unwrap_or_else(|| TaskInformation::started(&self.name, self.configuration));
        TaskEntry::from_information(&info, self.recorder.aggregate(), outcome.clone())
    }
}

/// A task ready to trigger. Dropping it without triggering discards it.
pub struct TransferTask {
    core: Arc<TaskCore>,
    behavior: Arc<dyn TaskBehavior>,
    observer: Option<Box<dyn FnOnce(TaskEntry) + Send>>,
}

impl TransferTask {
    pub fn new(
        name: impl Into<String>,
        configuration: TransferConfiguration,
        timeout: Duration,
        behavior: Arc<dyn TaskBehavior>,
    ) -> Self {
        Self {
            core: Arc::new(TaskCore::new(name.into(), configuration, timeout)),
            behavior,
            observer: None,
        }
    }

    /// Registers a callback invoked with the terminal entry before the
    /// terminal watch resolves. Used by the task manager to update
    /// history before any `wait_terminal` caller proceeds.
    pub fn set_termination_observer(&mut self, observer: impl FnOnce(TaskEntry) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            core: self.core.clone(),
            behavior: self.behavior.clone(),
        }
    }

    /// Starts the task. Publishes the initial progress snapshot, then
    /// runs the behavior under the task deadline on its own tokio task.
    pub fn trigger(self) -> TaskHandle {
        let TransferTask {
            core,
            behavior,
            observer,
        } = self;
        {
            let mut state = core.state.lock().unwrap();
            debug_assert_eq!(*state, TaskState::Initialized);
            *state = TaskState::Started;
        }
        let deadline = Instant::now() + core.timeout;
        let _ = core.deadline.set(deadline);
        core.info_tx
            .send_replace(Some(TaskInformation::started(&core.name, core.configuration)));
        info!(task = %core.name, "task triggered");

        let handle = TaskHandle {
            core: core.clone(),
            behavior: behavior.clone(),
        };
        tokio::spawn(async move {
            let ctl = TaskController { core: core.clone() };
            let result = timeout_at(deadline, behavior.run(ctl.clone())).await;
            let outcome = match result {
                Ok(Ok(())) => {
                    if core.private_cancel.load(Ordering::SeqCst) {
                        TaskOutcome::Cancelled
                    } else {
                        TaskOutcome::Succeeded
                    }
                }
                Ok(Err(err)) => TaskOutcome::from_error(&err),
                Err(_) => TaskOutcome::from_error(&TransferError::Timeout(core.timeout)),
            };
            behavior.on_stop(&ctl);
            let entry = core.seal(&outcome);
            debug!(task = %core.name, outcome = %entry.outcome, "task terminated");
            if let Some(observer) = observer {
                observer(entry.clone());
            }
            core.terminal_tx.send_replace(Some(entry));
        });
        handle
    }
}

/// Cheap clone used by manager and observers to watch and cancel a
/// running task.
#[derive(Clone)]
pub struct TaskHandle {
    core: Arc<TaskCore>,
    behavior: Arc<dyn TaskBehavior>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.core.name)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn information(&self) -> Option<TaskInformation> {
        self.core.info_tx.borrow().clone()
    }

    pub fn subscribe_information(&self) -> watch::Receiver<Option<TaskInformation>> {
        self.core.info_tx.subscribe()
    }

    pub fn terminal(&self) -> Option<TaskEntry> {
        self.core.terminal_tx.borrow().clone()
    }

    /// Waits for the task to end and returns its history entry.
    pub async fn wait_terminal(&self) -> TaskEntry {
        let mut rx = self.core.terminal_tx.subscribe();
        loop {
            if let Some(entry) = rx.borrow_and_update().clone() {
                return entry;
            }
            // the sender lives in our own core, it cannot drop first
            if rx.changed().await.is_err() {
                unreachable!("terminal channel closed before resolving");
            }
        }
    }

    /// Requests cancellation and waits for the terminal outcome.
    ///
    /// Resolves `Ok` only if the task actually ended cancelled. A task
    /// that completed despite the request reports [`CancelError::CompletedAnyway`];
    /// a failure that raced the request reports the failure.
    pub async fn cancel(&self) -> Result<(), CancelError> {
        if !self.core.cancel_requested.swap(true, Ordering::SeqCst) {
            debug!(task = %self.core.name, "cancellation requested");
            let ctl = TaskController {
                core: self.core.clone(),
            };
            self.behavior.on_cancel(&ctl);
        }
        let entry = self.wait_terminal().await;
        match entry.outcome {
            TaskOutcome::Cancelled => Ok(()),
            TaskOutcome::Succeeded => Err(CancelError::CompletedAnyway),
            TaskOutcome::Failed { message, .. } => Err(CancelError::TaskFailed { message }),
        }
    }
}

/// The behavior's view of its own task: configuration, progress
/// accounting, stopwatches, and cancellation checkpoints.
#[derive(Clone)]
pub struct TaskController {
    core: Arc<TaskCore>,
}

impl TaskController {
    pub fn configuration(&self) -> TransferConfiguration {
        self.core.configuration
    }

    /// Absolute deadline of this run.
    pub fn deadline(&self) -> Instant {
        self.core
            .deadline
            .get()
            .copied()
            .unwrap_or_else(|| Instant::now() + self.core.timeout)
    }

    pub fn deadline_exceeded(&self) -> Result<(), TransferError> {
        if Instant::now() > self.deadline() {
            return Err(TransferError::Timeout(self.core.timeout));
        }
        Ok(())
    }

    /// Cancellation checkpoint. Behaviors call this between records and
    /// bail out with `Err(Cancelled)` when a request is pending.
    pub fn checkpoint(&self) -> Result<(), TransferError> {
        if self.core.cancel_requested.load(Ordering::SeqCst) {
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    pub fn set_private_cancel(&self) {
        self.core.private_cancel.store(true, Ordering::SeqCst);
    }

    pub fn add_input_read(&self, bytes: u64) {
        self.core.update_info(|info| info.with_input_read(bytes));
    }

    pub fn add_output_written(&self, bytes: u64) {
        self.core
            .update_info(|info| info.with_output_written(bytes));
    }

    pub fn record_configuration(&self, configuration: TransferConfiguration) {
        self.core
            .update_info(|info| info.with_configuration(configuration));
    }

    pub fn stopwatch<'a>(&'a self, label: &'a str) -> Stopwatch<'a> {
        self.core.recorder.stopwatch(label)
    }
}
