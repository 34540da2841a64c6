//! Simulated host runtime for executing builder routines
//!
//! Builder routines are written against a framework that launches
//! processes, checks privileges, creates namespaces and writes logs. The
//! dynamic extractor hands them an [`ExecutionEnvironment`] instead, built
//! fresh for each extraction and dropped afterwards, together with a
//! [`ConstructionObserver`] that can stop the routine once the topology is
//! complete.

mod environment;
mod observer;
mod simulated;

pub use environment::{CommandStatus, ExecutionEnvironment, LimitScope, RuntimeSettings};
#[cfg(test)]
pub use environment::MockExecutionEnvironment;
pub use observer::{CaptureObserver, CapturePolicy, ConstructionObserver, Flow};
pub use simulated::{mkdir_targets, SimulatedRuntime};
