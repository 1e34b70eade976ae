//! Collection run records and their parameters

use crate::error::RunError;
use crate::sampler::{Sampler, SamplerConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Parameters of a bounded collection run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    pub duration_minutes: i64,
    pub interval_seconds: i64,
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
}

impl RunParams {
    pub fn new(duration_minutes: i64, interval_seconds: i64) -> Self {
        Self {
            duration_minutes,
            interval_seconds,
            excluded_namespaces: Vec::new(),
        }
    }

    pub fn excluding<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the parameters and derive the iteration schedule
    pub fn plan(&self) -> Result<RunPlan, RunError> {
        RunPlan::new(self.duration_minutes, self.interval_seconds)
    }

    /// Sampler honoring this run's exclusion list
    ///
    /// A run without its own exclusions inherits those of `base`.
    pub fn sampler(&self, base: &SamplerConfig) -> Sampler {
        let excluded: BTreeSet<String> = self
            .excluded_namespaces
            .iter()
            .map(|ns| ns.trim())
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect();

        let mut config = base.clone();
        if !excluded.is_empty() {
            config.excluded_namespaces = excluded;
        }
        Sampler::new(config)
    }
}

/// Iteration schedule of a bounded run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    /// `floor(duration_minutes * 60 / interval_seconds)`; may be zero
    pub iterations: u64,
    pub interval: Duration,
}

impl RunPlan {
    pub fn new(duration_minutes: i64, interval_seconds: i64) -> Result<Self, RunError> {
        if duration_minutes <= 0 {
            return Err(RunError::InvalidConfig(format!(
                "duration must be positive, got {} minutes",
                duration_minutes
            )));
        }
        if interval_seconds <= 0 {
            return Err(RunError::InvalidConfig(format!(
                "interval must be positive, got {} seconds",
                interval_seconds
            )));
        }

        let total_secs = duration_minutes.checked_mul(60).ok_or_else(|| {
            RunError::InvalidConfig(format!("duration of {} minutes is too large", duration_minutes))
        })?;

        Ok(Self {
            iterations: (total_secs / interval_seconds) as u64,
            interval: Duration::from_secs(interval_seconds as u64),
        })
    }
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// One bounded collection session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRun {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub interval_seconds: i64,
    pub excluded_namespaces: Vec<String>,
    pub status: RunStatus,
    pub iterations_planned: u64,
    /// Cycles that ran, successful or not
    pub iterations_completed: u64,
    pub samples_collected: u64,
    pub failed_cycles: u64,
    /// Stopped early on request
    pub cancelled: bool,
    pub error: Option<String>,
    pub progress_log: Vec<String>,
}

/// Shared, mutable view of a run in progress
///
/// The loop writes through it while status queries read snapshots. Once
/// the run is terminal, further updates are ignored.
#[derive(Debug, Clone)]
pub struct RunTracker {
    id: Arc<str>,
    record: Arc<RwLock<CollectionRun>>,
}

impl RunTracker {
    pub fn new(id: impl Into<String>, params: &RunParams, plan: &RunPlan) -> Self {
        let id: String = id.into();
        let record = CollectionRun {
            id: id.clone(),
            start_time: Utc::now(),
            end_time: None,
            duration_minutes: params.duration_minutes,
            interval_seconds: params.interval_seconds,
            excluded_namespaces: params.excluded_namespaces.clone(),
            status: RunStatus::Running,
            iterations_planned: plan.iterations,
            iterations_completed: 0,
            samples_collected: 0,
            failed_cycles: 0,
            cancelled: false,
            error: None,
            progress_log: Vec::new(),
        };

        Self {
            id: Arc::from(id),
            record: Arc::new(RwLock::new(record)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a timestamped line to the run's progress log
    pub async fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(run_id = %self.id, "{}", message);

        let line = format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), message);
        self.record.write().await.progress_log.push(line);
    }

    /// Count a cycle that reached the store
    pub async fn record_cycle(&self, samples: usize) {
        let mut record = self.record.write().await;
        if record.status == RunStatus::Running {
            record.iterations_completed += 1;
            record.samples_collected += samples as u64;
        }
    }

    /// Count a cycle whose data-source call failed
    pub async fn record_failed_cycle(&self) {
        let mut record = self.record.write().await;
        if record.status == RunStatus::Running {
            record.iterations_completed += 1;
            record.failed_cycles += 1;
        }
    }

    pub async fn complete(&self, cancelled: bool) {
        let mut record = self.record.write().await;
        if record.status == RunStatus::Running {
            record.status = RunStatus::Completed;
            record.cancelled = cancelled;
            record.end_time = Some(Utc::now());
        }
    }

    pub async fn fail(&self, error: impl Into<String>) {
        let mut record = self.record.write().await;
        if record.status == RunStatus::Running {
            record.status = RunStatus::Failed;
            record.error = Some(error.into());
            record.end_time = Some(Utc::now());
        }
    }

    pub async fn status(&self) -> RunStatus {
        self.record.read().await.status
    }

    pub async fn snapshot(&self) -> CollectionRun {
        self.record.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_iterations() {
        let plan = RunPlan::new(5, 60).unwrap();
        assert_eq!(plan.iterations, 5);
        assert_eq!(plan.interval, Duration::from_secs(60));

        assert_eq!(RunPlan::new(10, 45).unwrap().iterations, 13);
        assert_eq!(RunPlan::new(1, 120).unwrap().iterations, 0);
    }

    #[test]
    fn test_plan_rejects_non_positive_inputs() {
        assert!(matches!(RunPlan::new(0, 60), Err(RunError::InvalidConfig(_))));
        assert!(matches!(RunPlan::new(5, 0), Err(RunError::InvalidConfig(_))));
        assert!(matches!(RunPlan::new(-1, 60), Err(RunError::InvalidConfig(_))));
        assert!(matches!(RunPlan::new(i64::MAX, 60), Err(RunError::InvalidConfig(_))));
    }

    #[test]
    fn test_params_deserialize_without_exclusions() {
        let params: RunParams =
            serde_json::from_str(r#"{"durationMinutes": 30, "intervalSeconds": 60}"#).unwrap();
        assert_eq!(params, RunParams::new(30, 60));

        let sampler = params.sampler(&SamplerConfig::default());
        assert!(sampler.config().excluded_namespaces.contains("kube-system"));
    }

    #[test]
    fn test_params_sampler_uses_run_exclusions() {
        let params = RunParams::new(30, 60).excluding(["batch", "ci"]);
        let sampler = params.sampler(&SamplerConfig::default());

        let excluded = &sampler.config().excluded_namespaces;
        assert!(excluded.contains("batch"));
        assert!(excluded.contains("ci"));
        assert!(!excluded.contains("kube-system"));
    }

    #[test]
    fn test_params_sampler_inherits_base_exclusions() {
        let mut base = SamplerConfig::with_excluded(["monitoring"]);
        base.sanity_ceiling = Duration::from_secs(3_600);

        for params in [
            RunParams::new(5, 60),
            RunParams::new(5, 60).excluding(["", "  "]),
        ] {
            let sampler = params.sampler(&base);
            let excluded = &sampler.config().excluded_namespaces;
            assert!(excluded.contains("monitoring"));
            assert!(!excluded.contains("kube-system"));
            assert_eq!(sampler.config().sanity_ceiling, Duration::from_secs(3_600));
        }

        let sampler = RunParams::new(5, 60).excluding([" ci "]).sampler(&base);
        let excluded = &sampler.config().excluded_namespaces;
        assert!(excluded.contains("ci"));
        assert!(!excluded.contains("monitoring"));
    }

    #[tokio::test]
    async fn test_tracker_ignores_updates_after_terminal_state() {
        let params = RunParams::new(5, 60);
        let tracker = RunTracker::new("run-1", &params, &params.plan().unwrap());

        tracker.record_cycle(3).await;
        tracker.record_failed_cycle().await;
        tracker.fail("disk full").await;
        tracker.record_cycle(10).await;
        tracker.complete(true).await;

        let run = tracker.snapshot().await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.iterations_completed, 2);
        assert_eq!(run.samples_collected, 3);
        assert_eq!(run.failed_cycles, 1);
        assert_eq!(run.error.as_deref(), Some("disk full"));
        assert!(!run.cancelled);
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn test_tracker_log_is_ordered() {
        let params = RunParams::new(5, 60);
        let tracker = RunTracker::new("run-2", &params, &params.plan().unwrap());

        tracker.log("first").await;
        tracker.log("second").await;

        let run = tracker.snapshot().await;
        assert_eq!(run.progress_log.len(), 2);
        assert!(run.progress_log[0].ends_with("first"));
        assert!(run.progress_log[1].ends_with("second"));
    }
}
