//! Pipeline orchestration: batch partitioning, stage workers, and the
//! scheduler that chains them through the file-backed state machine.

pub mod context;
pub mod partition;
pub mod scheduler;
pub mod workers;

pub use context::{WorkerContext, WorkerResponse};
pub use partition::{BatchSets, batch_priority, batch_suffix, dual_partition, partition};
pub use scheduler::{
    Dispatch, InProcessInvoker, Scheduler, Stage, WorkerInvoker, WorkerServices,
};

#[cfg(test)]
mod pipeline_tests;
