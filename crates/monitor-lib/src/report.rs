//! Queue time reports
//!
//! Composes overall, per-namespace and top-N statistics into one typed
//! report, and flattens it into CSV tables for spreadsheets.

use crate::aggregate::{self, DurationValue, GroupStats, OverallStats, TopRecord, WorkloadKey};
use crate::error::StoreError;
use crate::models::Sample;
use crate::store::HistoryRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::info;

pub const QUEUE_TIMES_FILE: &str = "queue_times.csv";
pub const NAMESPACE_STATS_FILE: &str = "namespace_stats.csv";
pub const TOP_PODS_FILE: &str = "top_pods.csv";
pub const OVERALL_STATS_FILE: &str = "overall_stats.csv";

/// Which samples the statistics were computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsInput {
    /// Every observation, repeated sightings included
    Raw,
    /// One observation per workload uid, earliest first
    #[default]
    Deduplicated,
}

impl StatsInput {
    pub fn from_raw_flag(raw: bool) -> Self {
        if raw {
            StatsInput::Raw
        } else {
            StatsInput::Deduplicated
        }
    }

    /// Apply this choice to a sample sequence
    pub fn select<'a>(&self, samples: &'a [Sample]) -> Cow<'a, [Sample]> {
        match self {
            StatsInput::Raw => Cow::Borrowed(samples),
            StatsInput::Deduplicated => Cow::Owned(aggregate::dedup(samples)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatsInput::Raw => "raw",
            StatsInput::Deduplicated => "deduplicated",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub input: StatsInput,
    pub top_n: usize,
    pub top_key: WorkloadKey,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            input: StatsInput::Deduplicated,
            top_n: 10,
            top_key: WorkloadKey::Uid,
        }
    }
}

/// Aggregate view over one sample collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTimeReport {
    pub generated_at: DateTime<Utc>,
    pub input: StatsInput,
    /// Samples the statistics were computed over, after input selection
    pub sample_count: usize,
    /// `None` when there is no data
    pub overall: Option<OverallStats>,
    pub by_namespace: Vec<GroupStats>,
    pub top: Vec<TopRecord>,
}

impl QueueTimeReport {
    pub fn build(samples: &[Sample], options: &ReportOptions, generated_at: DateTime<Utc>) -> Self {
        let input = options.input.select(samples);

        Self {
            generated_at,
            input: options.input,
            sample_count: input.len(),
            overall: aggregate::overall(&input),
            by_namespace: aggregate::by_namespace(&input),
            top: aggregate::top_n(&input, options.top_n, options.top_key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.overall.is_none()
    }

    /// Write the report tables plus `history` (as-is) into `dir`
    ///
    /// `overall_stats.csv` is skipped when there is no data. Returns the
    /// files written.
    pub fn write_csv_dir(&self, dir: &Path, history: &[Sample]) -> Result<Vec<PathBuf>, StoreError> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut written = Vec::with_capacity(4);

        let path = dir.join(QUEUE_TIMES_FILE);
        write_rows(&path, history.iter().map(HistoryRow::from))?;
        written.push(path);

        let path = dir.join(NAMESPACE_STATS_FILE);
        write_rows(&path, self.by_namespace.iter().map(NamespaceRow::from))?;
        written.push(path);

        let path = dir.join(TOP_PODS_FILE);
        write_rows(
            &path,
            self.top
                .iter()
                .enumerate()
                .map(|(i, record)| TopPodRow::new(i + 1, record)),
        )?;
        written.push(path);

        if let Some(overall) = &self.overall {
            let path = dir.join(OVERALL_STATS_FILE);
            write_rows(&path, std::iter::once(OverallRow::new(self.input, overall)))?;
            written.push(path);
        }

        info!(dir = %dir.display(), files = written.len(), "Wrote queue time report");
        Ok(written)
    }
}

/// A flat CSV table row with a fixed column list
///
/// The header is written up front so an empty table still names its columns.
trait CsvRow: Serialize {
    const HEADER: &'static [&'static str];
}

impl CsvRow for HistoryRow {
    const HEADER: &'static [&'static str] = &[
        "Timestamp",
        "Namespace",
        "Pod",
        "PodUID",
        "QueueTime",
        "CreationTime",
        "StartTime",
    ];
}

fn write_rows<T, I>(path: &Path, rows: I) -> Result<(), StoreError>
where
    T: CsvRow,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| StoreError::csv(path, e))?;
    writer
        .write_record(T::HEADER)
        .map_err(|e| StoreError::csv(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| StoreError::csv(path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))
}

fn rounded(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct NamespaceRow {
    namespace: String,
    pod_count: usize,
    unique_pods: usize,
    mean_seconds: f64,
    mean_days: u64,
    mean_hours: u64,
    mean_minutes: u64,
    mean_secs: f64,
    max_seconds: f64,
    max_days: u64,
    max_hours: u64,
    max_minutes: u64,
    max_secs: f64,
    min_seconds: f64,
    min_days: u64,
    min_hours: u64,
    min_minutes: u64,
    min_secs: f64,
    std_dev_seconds: Option<f64>,
}

impl CsvRow for NamespaceRow {
    const HEADER: &'static [&'static str] = &[
        "Namespace",
        "PodCount",
        "UniquePods",
        "MeanSeconds",
        "MeanDays",
        "MeanHours",
        "MeanMinutes",
        "MeanSecs",
        "MaxSeconds",
        "MaxDays",
        "MaxHours",
        "MaxMinutes",
        "MaxSecs",
        "MinSeconds",
        "MinDays",
        "MinHours",
        "MinMinutes",
        "MinSecs",
        "StdDevSeconds",
    ];
}

impl From<&GroupStats> for NamespaceRow {
    fn from(group: &GroupStats) -> Self {
        let (mean, max, min) = (&group.mean.breakdown, &group.max.breakdown, &group.min.breakdown);
        Self {
            namespace: group.key.clone(),
            pod_count: group.count,
            unique_pods: group.unique_workload_count,
            mean_seconds: rounded(group.mean.seconds),
            mean_days: mean.days,
            mean_hours: mean.hours,
            mean_minutes: mean.minutes,
            mean_secs: mean.seconds,
            max_seconds: rounded(group.max.seconds),
            max_days: max.days,
            max_hours: max.hours,
            max_minutes: max.minutes,
            max_secs: max.seconds,
            min_seconds: rounded(group.min.seconds),
            min_days: min.days,
            min_hours: min.hours,
            min_minutes: min.minutes,
            min_secs: min.seconds,
            std_dev_seconds: group.stddev.map(|v| rounded(v.seconds)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TopPodRow {
    rank: usize,
    namespace: String,
    pod: String,
    #[serde(rename = "PodUID")]
    pod_uid: String,
    queue_time_seconds: f64,
    days: u64,
    hours: u64,
    minutes: u64,
    seconds: f64,
    creation_time: String,
    start_time: String,
    observed_at: String,
}

impl CsvRow for TopPodRow {
    const HEADER: &'static [&'static str] = &[
        "Rank",
        "Namespace",
        "Pod",
        "PodUID",
        "QueueTimeSeconds",
        "Days",
        "Hours",
        "Minutes",
        "Seconds",
        "CreationTime",
        "StartTime",
        "ObservedAt",
    ];
}

impl TopPodRow {
    fn new(rank: usize, record: &TopRecord) -> Self {
        let b = &record.queue_time.breakdown;
        Self {
            rank,
            namespace: record.namespace.clone(),
            pod: record.name.clone(),
            pod_uid: record.uid.clone(),
            queue_time_seconds: rounded(record.queue_time.seconds),
            days: b.days,
            hours: b.hours,
            minutes: b.minutes,
            seconds: b.seconds,
            creation_time: record.creation_time.to_rfc3339(),
            start_time: record.start_time.to_rfc3339(),
            observed_at: record.observed_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OverallRow {
    input: &'static str,
    count: usize,
    unique_pods: usize,
    namespaces: usize,
    mean_seconds: f64,
    mean: String,
    median_seconds: f64,
    max_seconds: f64,
    max: String,
    min_seconds: f64,
    std_dev_seconds: Option<f64>,
    max_namespace: String,
    max_pod: String,
    #[serde(rename = "MaxPodUID")]
    max_pod_uid: String,
}

impl CsvRow for OverallRow {
    const HEADER: &'static [&'static str] = &[
        "Input",
        "Count",
        "UniquePods",
        "Namespaces",
        "MeanSeconds",
        "Mean",
        "MedianSeconds",
        "MaxSeconds",
        "Max",
        "MinSeconds",
        "StdDevSeconds",
        "MaxNamespace",
        "MaxPod",
        "MaxPodUID",
    ];
}

impl OverallRow {
    fn new(input: StatsInput, stats: &OverallStats) -> Self {
        let seconds = |v: &DurationValue| rounded(v.seconds);
        Self {
            input: input.as_str(),
            count: stats.count,
            unique_pods: stats.unique_workload_count,
            namespaces: stats.namespace_count,
            mean_seconds: seconds(&stats.mean),
            mean: stats.mean.breakdown.to_string(),
            median_seconds: seconds(&stats.median),
            max_seconds: seconds(&stats.max),
            max: stats.max.breakdown.to_string(),
            min_seconds: seconds(&stats.min),
            std_dev_seconds: stats.stddev.as_ref().map(seconds),
            max_namespace: stats.argmax.namespace.clone(),
            max_pod: stats.argmax.name.clone(),
            max_pod_uid: stats.argmax.uid.clone(),
        }
    }
}
