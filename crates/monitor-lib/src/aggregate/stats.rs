//! Queue time statistics over sample collections
//!
//! Every function here is pure and independent of input order: values are
//! sorted before summing and ties are broken on workload identity.

use super::breakdown::DurationValue;
use super::dedup::unique_workloads;
use crate::models::{Sample, WorkloadRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Whole-collection statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub count: usize,
    pub unique_workload_count: usize,
    pub namespace_count: usize,
    pub mean: DurationValue,
    pub median: DurationValue,
    pub max: DurationValue,
    pub min: DurationValue,
    /// Sample standard deviation; absent below two samples
    pub stddev: Option<DurationValue>,
    /// Workload with the longest queue time
    pub argmax: WorkloadRef,
}

/// Statistics for one group of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub key: String,
    pub count: usize,
    pub unique_workload_count: usize,
    pub mean: DurationValue,
    pub max: DurationValue,
    pub min: DurationValue,
    pub stddev: Option<DurationValue>,
}

/// One of the longest-queued workloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopRecord {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub queue_time: DurationValue,
    pub creation_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

/// What counts as "the same workload" for top-N ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkloadKey {
    #[default]
    Uid,
    NamespaceName,
}

impl WorkloadKey {
    fn key(&self, sample: &Sample) -> (String, String) {
        match self {
            WorkloadKey::Uid => (sample.uid.clone(), String::new()),
            WorkloadKey::NamespaceName => (sample.namespace.clone(), sample.name.clone()),
        }
    }
}

/// Shared moments of a value set
struct Moments {
    mean: f64,
    median: f64,
    max: f64,
    min: f64,
    stddev: Option<f64>,
}

impl Moments {
    fn compute(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };
        let stddev = (n >= 2).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        });

        Some(Self {
            mean,
            median,
            max: values[n - 1],
            min: values[0],
            stddev,
        })
    }
}

/// Total order used to pick a single sample among equal values
fn identity_cmp(a: &Sample, b: &Sample) -> Ordering {
    a.namespace
        .cmp(&b.namespace)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.uid.cmp(&b.uid))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
}

/// Overall statistics; `None` is the "no data" result for empty input
///
/// `unique_workload_count` is always by uid. The other figures are over
/// exactly the samples passed in; deduplicating first is the caller's call.
pub fn overall(samples: &[Sample]) -> Option<OverallStats> {
    let moments = Moments::compute(samples.iter().map(|s| s.queue_time_secs).collect())?;

    let argmax = samples.iter().max_by(|a, b| {
        a.queue_time_secs
            .total_cmp(&b.queue_time_secs)
            .then_with(|| identity_cmp(b, a))
    })?;

    let namespace_count = samples
        .iter()
        .map(|s| s.namespace.as_str())
        .collect::<HashSet<_>>()
        .len();

    Some(OverallStats {
        count: samples.len(),
        unique_workload_count: unique_workloads(samples),
        namespace_count,
        mean: DurationValue::from_secs(moments.mean),
        median: DurationValue::from_secs(moments.median),
        max: DurationValue::from_secs(moments.max),
        min: DurationValue::from_secs(moments.min),
        stddev: moments.stddev.map(DurationValue::from_secs),
        argmax: WorkloadRef::from(argmax),
    })
}

/// Per-group statistics, highest mean first, ties by key
pub fn by_group<F>(samples: &[Sample], key_fn: F) -> Vec<GroupStats>
where
    F: Fn(&Sample) -> String,
{
    let mut groups: BTreeMap<String, Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(key_fn(sample)).or_default().push(sample);
    }

    let mut stats: Vec<GroupStats> = groups
        .into_iter()
        .filter_map(|(key, members)| {
            let moments = Moments::compute(members.iter().map(|s| s.queue_time_secs).collect())?;
            let unique = members
                .iter()
                .map(|s| s.uid.as_str())
                .collect::<HashSet<_>>()
                .len();

            Some(GroupStats {
                key,
                count: members.len(),
                unique_workload_count: unique,
                mean: DurationValue::from_secs(moments.mean),
                max: DurationValue::from_secs(moments.max),
                min: DurationValue::from_secs(moments.min),
                stddev: moments.stddev.map(DurationValue::from_secs),
            })
        })
        .collect();

    stats.sort_by(|a, b| {
        b.mean
            .seconds
            .total_cmp(&a.mean.seconds)
            .then_with(|| a.key.cmp(&b.key))
    });
    stats
}

/// Per-namespace statistics
pub fn by_namespace(samples: &[Sample]) -> Vec<GroupStats> {
    by_group(samples, |s| s.namespace.clone())
}

/// The `n` workloads with the longest queue time
///
/// Each workload contributes its longest observed queue time once.
pub fn top_n(samples: &[Sample], n: usize, key: WorkloadKey) -> Vec<TopRecord> {
    let mut longest: HashMap<(String, String), &Sample> = HashMap::new();
    for sample in samples {
        longest
            .entry(key.key(sample))
            .and_modify(|current| {
                let ord = sample
                    .queue_time_secs
                    .total_cmp(&current.queue_time_secs)
                    .then_with(|| current.timestamp.cmp(&sample.timestamp));
                if ord == Ordering::Greater {
                    *current = sample;
                }
            })
            .or_insert(sample);
    }

    let mut ranked: Vec<&Sample> = longest.into_values().collect();
    ranked.sort_by(|a, b| {
        b.queue_time_secs
            .total_cmp(&a.queue_time_secs)
            .then_with(|| identity_cmp(a, b))
    });

    ranked
        .into_iter()
        .take(n)
        .map(|s| TopRecord {
            namespace: s.namespace.clone(),
            name: s.name.clone(),
            uid: s.uid.clone(),
            queue_time: DurationValue::from_secs(s.queue_time_secs),
            creation_time: s.creation_time,
            start_time: s.start_time,
            observed_at: s.timestamp,
        })
        .collect()
}
