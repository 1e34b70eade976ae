//! Single-run coordination
//!
//! At most one bounded run is active per process. A start request while a
//! run is active is answered with [`StartOutcome::AlreadyInProgress`] and
//! leaves the active run untouched.

use super::r#loop::CollectionLoop;
use super::run::{CollectionRun, RunParams, RunPlan, RunTracker};
use crate::error::RunError;
use crate::observability::{MonitorMetrics, StructuredLogger};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default bound of the recent runs list
pub const DEFAULT_MAX_RECENT_RUNS: usize = 10;

/// Answer to a start request
#[derive(Debug)]
pub enum StartOutcome<T> {
    Started(T),
    AlreadyInProgress { run_id: String },
}

/// Everything a caller needs to drive a run it was allowed to start
///
/// The holder must hand the tracker back through [`RunCoordinator::finish`],
/// which releases the slot and fires `finished`.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub tracker: RunTracker,
    pub plan: RunPlan,
    pub cancel: CancellationToken,
    pub finished: CancellationToken,
}

/// A run executing on the runtime
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    pub join: JoinHandle<CollectionRun>,
}

/// Status surface: `{active, currentRun, recentRuns}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusReport {
    pub active: bool,
    pub current_run: Option<CollectionRun>,
    /// Most recent first
    pub recent_runs: Vec<CollectionRun>,
}

#[derive(Default)]
struct CoordinatorState {
    current: Option<RunTicket>,
    recent: VecDeque<CollectionRun>,
}

/// Owner of the process-wide "is a run active" state
pub struct RunCoordinator {
    state: Mutex<CoordinatorState>,
    max_recent: usize,
    next_seq: AtomicU64,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl Default for RunCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECENT_RUNS)
    }
}

impl RunCoordinator {
    pub fn new(max_recent: usize) -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
            max_recent,
            next_seq: AtomicU64::new(1),
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    fn next_run_id(&self) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        format!("run-{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), seq)
    }

    /// Claim the single run slot
    ///
    /// Parameters are validated first, so a bad configuration is reported
    /// even while another run is active.
    pub async fn try_start(&self, params: &RunParams) -> Result<StartOutcome<RunTicket>, RunError> {
        let plan = params.plan()?;

        let mut state = self.state.lock().await;
        if let Some(current) = &state.current {
            return Ok(StartOutcome::AlreadyInProgress {
                run_id: current.tracker.id().to_string(),
            });
        }

        let ticket = RunTicket {
            tracker: RunTracker::new(self.next_run_id(), params, &plan),
            plan,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        };
        state.current = Some(ticket.clone());
        drop(state);

        self.metrics.set_run_active(true);
        self.logger.log_run_started(
            ticket.tracker.id(),
            params.duration_minutes,
            params.interval_seconds,
        );

        Ok(StartOutcome::Started(ticket))
    }

    /// Release the slot held by `tracker` and archive its record
    ///
    /// A run still marked running is completed first. Returns the archived
    /// record.
    pub async fn finish(&self, tracker: &RunTracker) -> CollectionRun {
        tracker.complete(false).await;
        let record = tracker.snapshot().await;

        let mut state = self.state.lock().await;
        let released = if state
            .current
            .as_ref()
            .is_some_and(|current| current.tracker.id() == tracker.id())
        {
            state.current.take()
        } else {
            None
        };
        state.recent.push_front(record.clone());
        state.recent.truncate(self.max_recent);
        drop(state);

        self.metrics.set_run_active(false);
        self.metrics.inc_runs(if record.cancelled {
            "cancelled"
        } else {
            record.status.as_str()
        });
        self.logger.log_run_finished(
            &record.id,
            record.status.as_str(),
            record.iterations_completed,
            record.cancelled,
            record.error.as_deref(),
        );

        if let Some(ticket) = released {
            ticket.finished.cancel();
        }
        record
    }

    /// Start a bounded run in the background
    ///
    /// The run executes on its own task under a supervisor that archives it
    /// even when that task panics, so the slot is always released.
    pub async fn spawn_run(
        self: &Arc<Self>,
        collection_loop: Arc<CollectionLoop>,
        params: RunParams,
    ) -> Result<StartOutcome<RunHandle>, RunError> {
        let ticket = match self.try_start(&params).await? {
            StartOutcome::Started(ticket) => ticket,
            StartOutcome::AlreadyInProgress { run_id } => {
                return Ok(StartOutcome::AlreadyInProgress { run_id })
            }
        };

        let run_id = ticket.tracker.id().to_string();
        let sampler = params.sampler(collection_loop.sampler().config());
        let coordinator = Arc::clone(self);

        let join = tokio::spawn(async move {
            let run = {
                let ticket = ticket.clone();
                tokio::spawn(async move {
                    collection_loop
                        .run_bounded(&ticket.plan, &sampler, &ticket.tracker, &ticket.cancel)
                        .await;
                })
            };

            if let Err(e) = run.await {
                error!(run_id = %ticket.tracker.id(), error = %e, "Collection run task died");
                ticket.tracker.fail(format!("run task died: {}", e)).await;
            }
            coordinator.finish(&ticket.tracker).await
        });

        Ok(StartOutcome::Started(RunHandle { run_id, join }))
    }

    /// Ask the active run to stop at its next suspension point
    ///
    /// Returns the id of the run that was asked to stop.
    pub async fn cancel_current(&self) -> Option<String> {
        let state = self.state.lock().await;
        let current = state.current.as_ref()?;
        current.cancel.cancel();
        info!(run_id = %current.tracker.id(), "Cancellation requested");
        Some(current.tracker.id().to_string())
    }

    /// Cancel the active run and wait until it has been archived
    ///
    /// The run stops at its next suspension point, so an in-flight cycle
    /// completes first. Returns the archived record, or `None` when no run
    /// was active.
    pub async fn shutdown(&self) -> Option<CollectionRun> {
        let (run_id, finished) = {
            let state = self.state.lock().await;
            let current = state.current.as_ref()?;
            current.cancel.cancel();
            (current.tracker.id().to_string(), current.finished.clone())
        };

        info!(run_id = %run_id, "Waiting for active run to stop");
        finished.cancelled().await;

        let state = self.state.lock().await;
        state.recent.iter().find(|run| run.id == run_id).cloned()
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    pub async fn status(&self) -> RunStatusReport {
        let (current, recent_runs) = {
            let state = self.state.lock().await;
            (
                state.current.as_ref().map(|t| t.tracker.clone()),
                state.recent.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let current_run = match current {
            Some(tracker) => Some(tracker.snapshot().await),
            None => None,
        };

        RunStatusReport {
            active: current_run.is_some(),
            current_run,
            recent_runs,
        }
    }
}
