//! CLI command implementations

pub mod collect;
pub mod daemon;
pub mod report;
