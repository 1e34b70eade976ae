//! Aggregation over queue time samples
//!
//! This module provides:
//! - Deduplication to one observation per workload
//! - Overall, per-group and top-N statistics
//! - Duration breakdowns for display

mod breakdown;
mod dedup;
mod stats;

pub use breakdown::{DurationBreakdown, DurationValue};
pub use dedup::{dedup, dedup_by_key, unique_workloads};
pub use stats::{
    by_group, by_namespace, overall, top_n, GroupStats, OverallStats, TopRecord, WorkloadKey,
};
