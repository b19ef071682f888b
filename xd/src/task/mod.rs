//! Task layer: lifecycle core, transfer variants, measurements, and
//! history.

pub mod core;
pub mod entry;
pub mod factory;
pub mod history;
pub mod info;
pub mod manager;
pub mod measurement;
pub mod multi;
pub mod pump;
pub mod single;

pub use self::core::{TaskBehavior, TaskController, TaskHandle, TransferTask};
pub use entry::{FailureKind, TaskEntry, TaskOutcome};
pub use factory::TaskFactory;
pub use history::{EntrySink, HistorySaver};
pub use info::TaskInformation;
pub use manager::TaskManager;
pub use measurement::{MeasurementRecorder, TaskMeasurement};
