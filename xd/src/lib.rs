//! xferd - producer/consumer transfer coordination
//!
//! A single admission front door accepts transfer requests and feeds
//! them to an on-demand dispatch worker. The worker runs one task at a
//! time; each task moves framed records from a producer peer to a
//! consumer peer over fixed-capacity pipes, measuring every operation
//! along the way. Terminal outcomes accumulate in a persisted history.
//!
//! The interesting parts live in:
//! - [`manager`]: admission gate, cold start, and the two-phase stop
//!   handshake that keeps a stopping worker from losing a request
//! - [`worker`]: the FIFO dispatch loop
//! - [`task`]: task lifecycle, the two transfer variants, measurements,
//!   and history persistence
//! - [`protocol`]: the framed wire format and the producer/consumer
//!   peers

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod task;
pub mod worker;

pub use domain::{TaskCode, TransferConfiguration, TransferRequest};
pub use error::{AdmissionError, CancelError, TransferError};
pub use manager::TransferManager;
pub use task::{TaskEntry, TaskManager, TaskOutcome};
