//! Cluster data sources
//!
//! A data source answers "list current workloads" with one record per pod.
//! A failed call (launch failure, non-zero exit, unparseable payload) is
//! reported as a `SourceError` and is distinct from an empty listing.

mod kubectl;

pub use kubectl::{parse_pod_list, KubectlSource};

use crate::error::SourceError;
use crate::models::WorkloadRecord;

pub use async_trait::async_trait;

/// Trait for cluster workload listings
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// List every workload currently known to the cluster
    async fn list_workloads(&self) -> Result<Vec<WorkloadRecord>, SourceError>;
}
