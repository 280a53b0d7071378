//! Poller supervision: per-account workers and fleet coordination.

pub mod state;
pub mod supervisor;
mod worker;

pub use state::{WorkerSnapshot, WorkerState};
pub use supervisor::{PollerSupervisor, StartReport, StartupFailure};
