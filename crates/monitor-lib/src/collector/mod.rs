//! Queue time collection
//!
//! This module provides the bounded and continuous collection loops, the
//! records describing a run, and the coordinator that allows only one
//! bounded run at a time.

mod coordinator;
mod r#loop;
mod run;

#[cfg(test)]
mod tests;

pub use coordinator::{
    RunCoordinator, RunHandle, RunStatusReport, RunTicket, StartOutcome, DEFAULT_MAX_RECENT_RUNS,
};
pub use r#loop::{CollectionLoop, CollectionLoopBuilder, CycleOutcome, CycleSummary};
pub use run::{CollectionRun, RunParams, RunPlan, RunStatus, RunTracker};
