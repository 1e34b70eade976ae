//! Queue-time monitoring library for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Sampling pod queue times (creation to start) from a cluster data source
//! - A deduplicated, retention-bounded history of samples persisted to CSV
//! - Global, per-namespace and top-N queue time statistics
//! - Bounded and continuous collection runs with single-run coordination
//! - Health checks and observability

pub mod aggregate;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod report;
pub mod sampler;
pub mod source;
pub mod store;

pub use error::{RunError, SourceError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
