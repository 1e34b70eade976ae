//! Core data models for the queue monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One workload as reported by the cluster data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub creation_time: DateTime<Utc>,
    /// Absent while the workload is still queued
    pub start_time: Option<DateTime<Utc>>,
}

/// One observation of a workload's queue time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Collection-cycle time, not a workload event time
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    /// `start_time - creation_time` in seconds, never negative
    pub queue_time_secs: f64,
    pub creation_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
}

impl Sample {
    /// Namespace-qualified workload name, `namespace/name`
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Reference to the workload behind an extreme value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl From<&Sample> for WorkloadRef {
    fn from(sample: &Sample) -> Self {
        Self {
            namespace: sample.namespace.clone(),
            name: sample.name.clone(),
            uid: sample.uid.clone(),
        }
    }
}
