//! Maps a task code to a ready-to-trigger task.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{TaskCode, TransferConfiguration};
use crate::protocol::Connector;
use crate::task::core::{TaskBehavior, TransferTask};
use crate::task::multi::MultiThreadTask;
use crate::task::single::SingleThreadTask;

pub struct TaskFactory {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl TaskFactory {
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub fn create(&self, code: TaskCode, configuration: TransferConfiguration) -> TransferTask {
        let behavior: Arc<dyn TaskBehavior> = match code {
            TaskCode::Single => Arc::new(SingleThreadTask::new(self.connector.clone())),
            TaskCode::Multi => Arc::new(MultiThreadTask::new(self.connector.clone())),
        };
        TransferTask::new(code.name(), configuration, self.timeout, behavior)
    }
}
