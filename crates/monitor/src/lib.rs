//! Queue monitor daemon
//!
//! Runs the continuous queue time collector and serves health, metrics,
//! run control and statistics over HTTP.

pub mod api;
pub mod config;
