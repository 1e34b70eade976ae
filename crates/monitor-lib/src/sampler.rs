//! Conversion of one cluster snapshot into queue-time samples
//!
//! Applies namespace exclusion, skips workloads that have not started yet
//! and drops samples whose queue time is negative or above the sanity
//! ceiling. Rejections are logged per record and never fail the cycle.

use crate::error::SourceError;
use crate::models::{Sample, WorkloadRecord};
use crate::source::WorkloadSource;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::warn;

/// Default ceiling for a believable queue time (30 days)
pub const DEFAULT_SANITY_CEILING: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Namespace excluded when the caller provides no exclusion list
pub const DEFAULT_EXCLUDED_NAMESPACE: &str = "kube-system";

/// Configuration for the sampler
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Namespaces whose workloads are never sampled
    pub excluded_namespaces: BTreeSet<String>,
    /// Queue times above this are treated as clock skew or stale state
    pub sanity_ceiling: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            excluded_namespaces: BTreeSet::from([DEFAULT_EXCLUDED_NAMESPACE.to_string()]),
            sanity_ceiling: DEFAULT_SANITY_CEILING,
        }
    }
}

impl SamplerConfig {
    /// Build a config from an explicit exclusion list; an empty list falls
    /// back to the default exclusion
    pub fn with_excluded<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let excluded: BTreeSet<String> = excluded
            .into_iter()
            .map(|ns| {
                let ns: String = ns.into();
                ns.trim().to_string()
            })
            .filter(|ns| !ns.is_empty())
            .collect();

        if excluded.is_empty() {
            Self::default()
        } else {
            Self {
                excluded_namespaces: excluded,
                ..Default::default()
            }
        }
    }
}

/// Why a record did not become a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Start precedes creation
    Negative,
    /// Queue time above the sanity ceiling
    AboveCeiling,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Negative => "negative",
            Rejection::AboveCeiling => "ceiling",
        }
    }
}

/// Output of one sampling pass
#[derive(Debug, Clone, Default)]
pub struct SampleBatch {
    pub samples: Vec<Sample>,
    /// Records skipped because their namespace is excluded
    pub excluded: usize,
    /// Records skipped because the workload is still queued
    pub pending: usize,
    /// Records dropped by validation
    pub rejected: Vec<(Rejection, String)>,
}

impl SampleBatch {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn rejected_count(&self, kind: Rejection) -> usize {
        self.rejected.iter().filter(|(k, _)| *k == kind).count()
    }
}

/// Turns raw workload records into samples
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample one snapshot taken at `at`
    pub fn sample(&self, records: &[WorkloadRecord], at: DateTime<Utc>) -> SampleBatch {
        let mut batch = SampleBatch::default();
        let ceiling_secs = self.config.sanity_ceiling.as_secs_f64();

        for record in records {
            if self.config.excluded_namespaces.contains(&record.namespace) {
                batch.excluded += 1;
                continue;
            }

            let Some(start_time) = record.start_time else {
                batch.pending += 1;
                continue;
            };

            let queue_time_secs = queue_time_secs(record.creation_time, start_time);

            let rejection = if queue_time_secs < 0.0 {
                Some(Rejection::Negative)
            } else if queue_time_secs > ceiling_secs {
                Some(Rejection::AboveCeiling)
            } else {
                None
            };

            if let Some(rejection) = rejection {
                warn!(
                    event = "sample_rejected",
                    namespace = %record.namespace,
                    pod = %record.name,
                    queue_time_secs = queue_time_secs,
                    reason = rejection.as_str(),
                    "Skipping pod with unreasonable queue time"
                );
                batch
                    .rejected
                    .push((rejection, format!("{}/{}", record.namespace, record.name)));
                continue;
            }

            batch.samples.push(Sample {
                timestamp: at,
                namespace: record.namespace.clone(),
                name: record.name.clone(),
                uid: record.uid.clone(),
                queue_time_secs,
                creation_time: record.creation_time,
                start_time,
            });
        }

        batch
    }

    /// Query the source and sample its answer
    ///
    /// A source failure yields an error and no partial batch.
    pub async fn collect(
        &self,
        source: &dyn WorkloadSource,
        at: DateTime<Utc>,
    ) -> Result<SampleBatch, SourceError> {
        let records = source.list_workloads().await?;
        Ok(self.sample(&records, at))
    }
}

fn queue_time_secs(created: DateTime<Utc>, started: DateTime<Utc>) -> f64 {
    (started - created).num_milliseconds() as f64 / 1000.0
}
