//! Retention-bounded sample history
//!
//! This module provides the window store backing the collector:
//! - Append-only in-memory history, published as immutable snapshots
//! - CSV persistence (`Timestamp,Namespace,Pod,PodUID,QueueTime,CreationTime,StartTime`)
//! - Time-window eviction, applied again at load time
//!
//! A single collector owns a history file. Pointing two collectors at the
//! same path is not detected and leaves the file in an undefined state.

use crate::error::StoreError;
use crate::models::Sample;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default retention window (7 days)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// File name of the persisted history inside the output directory
pub const HISTORY_FILE_NAME: &str = "queue_time_history.csv";

/// Layout written by older collectors for the `Timestamp` column
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HistoryRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Namespace")]
    namespace: String,
    #[serde(rename = "Pod")]
    pod: String,
    #[serde(rename = "PodUID")]
    pod_uid: String,
    #[serde(rename = "QueueTime")]
    queue_time: f64,
    #[serde(rename = "CreationTime")]
    creation_time: String,
    #[serde(rename = "StartTime")]
    start_time: String,
}

impl From<&Sample> for HistoryRow {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: format_timestamp(&sample.timestamp),
            namespace: sample.namespace.clone(),
            pod: sample.name.clone(),
            pod_uid: sample.uid.clone(),
            queue_time: sample.queue_time_secs,
            creation_time: format_timestamp(&sample.creation_time),
            start_time: format_timestamp(&sample.start_time),
        }
    }
}

impl HistoryRow {
    fn into_sample(self) -> Option<Sample> {
        if !self.queue_time.is_finite() || self.queue_time < 0.0 {
            return None;
        }

        Some(Sample {
            timestamp: parse_timestamp(&self.timestamp)?,
            namespace: self.namespace,
            name: self.pod,
            uid: self.pod_uid,
            queue_time_secs: self.queue_time,
            creation_time: parse_timestamp(&self.creation_time)?,
            start_time: parse_timestamp(&self.start_time)?,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC 3339 timestamp or the legacy naive layout (read as UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Oldest timestamp still inside `window` relative to `now`
fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Outcome of loading persisted history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Samples kept in the store
    pub loaded: usize,
    /// Rows older than the retention window at load time
    pub stale: usize,
    /// Rows that could not be parsed
    pub corrupt: usize,
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub entries: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub retention_seconds: u64,
    pub path: Option<PathBuf>,
}

/// Deduplication-agnostic, time-bounded sample history
///
/// Readers get an immutable snapshot that reflects either the state before
/// or after an append, never a partial one. Writers are serialized.
pub struct WindowStore {
    path: Option<PathBuf>,
    retention: Duration,
    snapshot: RwLock<Arc<Vec<Sample>>>,
    writer: Mutex<()>,
}

impl WindowStore {
    /// Create a store that keeps history in memory only
    pub fn in_memory(retention: Duration) -> Self {
        Self {
            path: None,
            retention,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// Open (or create) a persisted store
    ///
    /// Existing rows outside the window relative to `now` and rows that fail
    /// to parse are dropped immediately, and the file is rewritten without them.
    pub fn open(
        path: impl Into<PathBuf>,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Self, LoadReport), StoreError> {
        let path = path.into();
        let mut report = LoadReport::default();

        let samples = if path.exists() {
            let (rows, corrupt) = read_history(&path)?;
            let total = rows.len();
            let oldest_kept = cutoff(now, retention);
            let kept: Vec<Sample> = rows
                .into_iter()
                .filter(|s| s.timestamp >= oldest_kept)
                .collect();

            report.corrupt = corrupt;
            report.stale = total - kept.len();

            if report.corrupt > 0 {
                warn!(
                    path = %path.display(),
                    corrupt = report.corrupt,
                    "Dropped unparseable rows from queue time history"
                );
            }
            if report.stale + report.corrupt > 0 {
                rewrite_history(&path, &kept)?;
            }
            kept
        } else {
            Vec::new()
        };

        report.loaded = samples.len();
        info!(
            path = %path.display(),
            loaded = report.loaded,
            stale = report.stale,
            "Loaded queue time history"
        );

        let store = Self {
            path: Some(path),
            retention,
            snapshot: RwLock::new(Arc::new(samples)),
            writer: Mutex::new(()),
        };

        Ok((store, report))
    }

    /// Retention window configured for this store
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Backing file, if persisted
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append samples and persist them before returning
    ///
    /// No deduplication happens here. On a persistence error the in-memory
    /// history still contains the samples; a retried append may therefore
    /// duplicate rows, which read-time dedup absorbs.
    pub async fn append(&self, samples: &[Sample]) -> Result<usize, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let _writer = self.writer.lock().await;
        {
            let mut snapshot = self.snapshot.write().await;
            Arc::make_mut(&mut snapshot).extend_from_slice(samples);
        }

        if let Some(path) = &self.path {
            append_history(path, samples)?;
            debug!(path = %path.display(), appended = samples.len(), "History appended");
        }

        Ok(samples.len())
    }

    /// Remove every sample with `timestamp < now - window`
    ///
    /// Returns the number of evicted samples. The file is rewritten only
    /// when something was removed.
    pub async fn evict(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, StoreError> {
        let oldest_kept = cutoff(now, window);

        let _writer = self.writer.lock().await;
        let current = self.snapshot.read().await.clone();
        if current.iter().all(|s| s.timestamp >= oldest_kept) {
            return Ok(0);
        }

        let kept: Vec<Sample> = current
            .iter()
            .filter(|s| s.timestamp >= oldest_kept)
            .cloned()
            .collect();
        let evicted = current.len() - kept.len();
        let kept = Arc::new(kept);

        *self.snapshot.write().await = kept.clone();

        if let Some(path) = &self.path {
            rewrite_history(path, &kept)?;
        }

        debug!(evicted = evicted, remaining = kept.len(), "Evicted expired samples");
        Ok(evicted)
    }

    /// Evict with the configured retention window
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.evict(now, self.retention).await
    }

    /// Current contents, unfiltered
    pub async fn all(&self) -> Arc<Vec<Sample>> {
        self.snapshot.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot.read().await.is_empty()
    }

    /// Get statistics about the store
    pub async fn stats(&self) -> StoreStats {
        let snapshot = self.all().await;
        StoreStats {
            entries: snapshot.len(),
            oldest: snapshot.iter().map(|s| s.timestamp).min(),
            newest: snapshot.iter().map(|s| s.timestamp).max(),
            retention_seconds: self.retention.as_secs(),
            path: self.path.clone(),
        }
    }
}

/// Read a history file, returning parsed samples and the corrupt row count
pub fn read_history(path: &Path) -> Result<(Vec<Sample>, usize), StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let mut samples = Vec::new();
    let mut corrupt = 0;

    for row in reader.deserialize::<HistoryRow>() {
        match row {
            Ok(row) => match row.into_sample() {
                Some(sample) => samples.push(sample),
                None => corrupt += 1,
            },
            Err(e) if e.is_io_error() => return Err(StoreError::csv(path, e)),
            Err(_) => corrupt += 1,
        }
    }

    Ok((samples, corrupt))
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))
        }
        _ => Ok(()),
    }
}

fn append_history(path: &Path, samples: &[Sample]) -> Result<(), StoreError> {
    ensure_parent(path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    let needs_header = file.metadata().map_err(|e| StoreError::io(path, e))?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    for sample in samples {
        writer
            .serialize(HistoryRow::from(sample))
            .map_err(|e| StoreError::csv(path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))
}

/// Write the full history atomically through a temp file
pub(crate) fn rewrite_history(path: &Path, samples: &[Sample]) -> Result<(), StoreError> {
    ensure_parent(path)?;

    let temp_path = path.with_extension("csv.tmp");
    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| StoreError::io(&temp_path, e))?;

        let mut writer = csv::Writer::from_writer(file);
        for sample in samples {
            writer
                .serialize(HistoryRow::from(sample))
                .map_err(|e| StoreError::csv(&temp_path, e))?;
        }
        writer.flush().map_err(|e| StoreError::io(&temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| StoreError::io(&temp_path, e))?;
    }

    std::fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))
}
