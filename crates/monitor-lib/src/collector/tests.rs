//! Collection loop and coordinator tests against a scripted data source
//!
//! Timing tests run on a paused clock, so sleeps between iterations
//! complete instantly while `Instant` still reports virtual elapsed time.

use super::*;
use crate::error::SourceError;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::WorkloadRecord;
use crate::sampler::Sampler;
use crate::source::{async_trait, WorkloadSource};
use crate::store::{WindowStore, DEFAULT_RETENTION};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Listing = Result<Vec<WorkloadRecord>, SourceError>;

/// Replays scripted listings, then keeps answering with one fresh pod
struct ScriptedSource {
    script: std::sync::Mutex<VecDeque<Listing>>,
    calls: AtomicUsize,
    notify: Option<mpsc::UnboundedSender<usize>>,
}

impl ScriptedSource {
    fn new(script: Vec<Listing>) -> Self {
        Self {
            script: std::sync::Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            notify: None,
        }
    }

    fn notifying(tx: mpsc::UnboundedSender<usize>) -> Self {
        Self {
            notify: Some(tx),
            ..Self::new(Vec::new())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadSource for ScriptedSource {
    async fn list_workloads(&self) -> Result<Vec<WorkloadRecord>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(tx) = &self.notify {
            let _ = tx.send(call);
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(vec![started("default", &format!("pod-{}", call), 30)]))
    }
}

fn started(namespace: &str, name: &str, queue_secs: i64) -> WorkloadRecord {
    let created = Utc::now() - ChronoDuration::hours(1);
    WorkloadRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}-{}", namespace, name),
        creation_time: created,
        start_time: Some(created + ChronoDuration::seconds(queue_secs)),
    }
}

fn kubectl_failure() -> SourceError {
    SourceError::NonZeroExit {
        command: "kubectl get pods".to_string(),
        status: "exit status: 1".to_string(),
        stderr: "connection refused".to_string(),
    }
}

fn build_loop(source: Arc<dyn WorkloadSource>, store: Arc<WindowStore>) -> CollectionLoop {
    CollectionLoopBuilder::new()
        .source(source)
        .store(store)
        .build()
        .unwrap()
}

fn ticket_for(params: &RunParams) -> (RunPlan, RunTracker) {
    let plan = params.plan().unwrap();
    let tracker = RunTracker::new("run-test", params, &plan);
    (plan, tracker)
}

#[test]
fn test_builder_requires_source_and_store() {
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    assert!(CollectionLoopBuilder::new().store(store).build().is_err());

    let source = Arc::new(ScriptedSource::new(Vec::new()));
    assert!(CollectionLoopBuilder::new().source(source).build().is_err());
}

#[tokio::test]
async fn test_cycle_summary_and_source_health() {
    let source = Arc::new(ScriptedSource::new(vec![
        Ok(vec![
            started("a", "pod-1", 10),
            started("b", "pod-2", 5),
            started("a", "pod-3", 0),
        ]),
        Err(kubectl_failure()),
        Ok(Vec::new()),
    ]));
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let health = HealthRegistry::new();
    let collection_loop = CollectionLoopBuilder::new()
        .source(source)
        .store(store.clone())
        .health(health.clone())
        .build()
        .unwrap();
    let sampler = Sampler::default();

    match collection_loop.run_cycle(1, &sampler).await.unwrap() {
        CycleOutcome::Collected(summary) => {
            assert_eq!(summary.count, 3);
            assert_eq!(summary.namespaces, 2);
            assert_eq!(summary.max_secs, 10.0);
            assert_eq!(summary.slowest, "a/pod-1");
            assert_eq!(summary.evicted, 0);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(store.len().await, 3);

    let outcome = collection_loop.run_cycle(2, &sampler).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::SourceFailed(_)));
    assert_eq!(
        health.status_of(components::SOURCE).await,
        Some(ComponentStatus::Degraded)
    );
    assert_eq!(store.len().await, 3);

    let outcome = collection_loop.run_cycle(3, &sampler).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::NoSamples));
    assert_eq!(
        health.status_of(components::SOURCE).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test(start_paused = true)]
async fn test_bounded_run_sleeps_between_iterations_only() {
    let source = Arc::new(ScriptedSource::new(Vec::new()));
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let collection_loop = build_loop(source.clone(), store.clone());

    let params = RunParams::new(5, 60);
    let (plan, tracker) = ticket_for(&params);
    assert_eq!(plan.iterations, 5);

    let started_at = Instant::now();
    collection_loop
        .run_bounded(&plan, collection_loop.sampler(), &tracker, &CancellationToken::new())
        .await;
    let elapsed = started_at.elapsed();

    // Four sleeps of 60s, none after the fifth iteration
    assert!(elapsed >= Duration::from_secs(240), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(241), "elapsed {:?}", elapsed);
    assert_eq!(source.calls(), 5);

    let run = tracker.snapshot().await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.iterations_completed, 5);
    assert_eq!(run.samples_collected, 5);
    assert!(!run.cancelled);
    assert!(run.progress_log.iter().any(|l| l.contains("Iteration 5/5")));
    assert_eq!(store.len().await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycle_does_not_abort_run() {
    let source = Arc::new(ScriptedSource::new(vec![
        Ok(vec![started("a", "pod-1", 10)]),
        Err(kubectl_failure()),
    ]));
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let collection_loop = build_loop(source.clone(), store.clone());

    let params = RunParams::new(3, 60);
    let (plan, tracker) = ticket_for(&params);
    collection_loop
        .run_bounded(&plan, collection_loop.sampler(), &tracker, &CancellationToken::new())
        .await;

    let run = tracker.snapshot().await;
    assert_eq!(source.calls(), 3);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.iterations_completed, 3);
    assert_eq!(run.failed_cycles, 1);
    assert_eq!(run.samples_collected, 2);
    assert!(run
        .progress_log
        .iter()
        .any(|l| l.contains("Iteration 2/3 failed") && l.contains("connection refused")));
}

#[tokio::test]
async fn test_storage_failure_fails_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, "").unwrap();
    let (store, _) = WindowStore::open(
        blocker.join("queue_time_history.csv"),
        DEFAULT_RETENTION,
        Utc::now(),
    )
    .unwrap();
    let store = Arc::new(store);

    let source = Arc::new(ScriptedSource::new(Vec::new()));
    let health = HealthRegistry::new();
    let collection_loop = CollectionLoopBuilder::new()
        .source(source.clone())
        .store(store.clone())
        .health(health.clone())
        .build()
        .unwrap();

    let params = RunParams::new(5, 60);
    let (plan, tracker) = ticket_for(&params);
    collection_loop
        .run_bounded(&plan, collection_loop.sampler(), &tracker, &CancellationToken::new())
        .await;

    let run = tracker.snapshot().await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.is_some());
    assert_eq!(source.calls(), 1);
    // The failed append is still visible in memory
    assert_eq!(store.len().await, 1);
    assert_eq!(
        health.status_of(components::STORE).await,
        Some(ComponentStatus::Unhealthy)
    );
}

#[tokio::test]
async fn test_zero_iteration_plan_completes_without_sampling() {
    let source = Arc::new(ScriptedSource::new(Vec::new()));
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let collection_loop = build_loop(source.clone(), store);

    let params = RunParams::new(1, 120);
    let (plan, tracker) = ticket_for(&params);
    collection_loop
        .run_bounded(&plan, collection_loop.sampler(), &tracker, &CancellationToken::new())
        .await;

    let run = tracker.snapshot().await;
    assert_eq!(source.calls(), 0);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.iterations_completed, 0);
}

#[tokio::test]
async fn test_second_start_is_rejected_while_active() {
    let coordinator = RunCoordinator::default();

    let ticket = match coordinator.try_start(&RunParams::new(5, 60)).await.unwrap() {
        StartOutcome::Started(ticket) => ticket,
        StartOutcome::AlreadyInProgress { .. } => panic!("slot should be free"),
    };
    ticket.tracker.log("Iteration 1/5: 2 pods").await;
    let before = coordinator.status().await;

    match coordinator.try_start(&RunParams::new(10, 30)).await.unwrap() {
        StartOutcome::AlreadyInProgress { run_id } => assert_eq!(run_id, ticket.tracker.id()),
        StartOutcome::Started(_) => panic!("second run must not start"),
    }

    let after = coordinator.status().await;
    assert!(after.active);
    let (before, after) = (before.current_run.unwrap(), after.current_run.unwrap());
    assert_eq!(after.id, before.id);
    assert_eq!(after.status, RunStatus::Running);
    assert_eq!(after.duration_minutes, 5);
    assert_eq!(after.progress_log, before.progress_log);

    let archived = coordinator.finish(&ticket.tracker).await;
    assert_eq!(archived.status, RunStatus::Completed);

    let status = coordinator.status().await;
    assert!(!status.active);
    assert!(status.current_run.is_none());
    assert_eq!(status.recent_runs.len(), 1);

    assert!(matches!(
        coordinator.try_start(&RunParams::new(5, 60)).await.unwrap(),
        StartOutcome::Started(_)
    ));
}

#[tokio::test]
async fn test_invalid_params_do_not_claim_slot() {
    let coordinator = RunCoordinator::default();

    let result = coordinator.try_start(&RunParams::new(5, 0)).await;
    assert!(matches!(result, Err(crate::RunError::InvalidConfig(_))));
    assert!(!coordinator.is_active().await);
    assert!(coordinator.cancel_current().await.is_none());
}

#[tokio::test]
async fn test_recent_runs_are_bounded_most_recent_first() {
    let coordinator = RunCoordinator::new(2);
    let mut ids = Vec::new();

    for _ in 0..3 {
        match coordinator.try_start(&RunParams::new(1, 60)).await.unwrap() {
            StartOutcome::Started(ticket) => {
                ids.push(ticket.tracker.id().to_string());
                coordinator.finish(&ticket.tracker).await;
            }
            StartOutcome::AlreadyInProgress { .. } => panic!("slot should be free"),
        }
    }

    let recent = coordinator.status().await.recent_runs;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, ids[2]);
    assert_eq!(recent[1].id, ids[1]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_run_at_suspension_point() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = Arc::new(ScriptedSource::notifying(tx));
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let collection_loop = Arc::new(build_loop(source, store));
    let coordinator = Arc::new(RunCoordinator::default());

    let handle = match coordinator
        .spawn_run(collection_loop, RunParams::new(60, 60))
        .await
        .unwrap()
    {
        StartOutcome::Started(handle) => handle,
        StartOutcome::AlreadyInProgress { .. } => panic!("slot should be free"),
    };

    assert_eq!(rx.recv().await, Some(1));
    assert_eq!(
        coordinator.cancel_current().await.as_deref(),
        Some(handle.run_id.as_str())
    );

    let run = handle.join.await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.cancelled);
    assert!(run.iterations_completed >= 1 && run.iterations_completed < 60);
    assert!(run.progress_log.iter().any(|l| l.contains("Cancelled after")));

    let status = coordinator.status().await;
    assert!(!status.active);
    assert_eq!(status.recent_runs[0].id, handle.run_id);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_loop_runs_until_cancelled() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = Arc::new(ScriptedSource::notifying(tx));
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let health = HealthRegistry::new();
    let collection_loop = Arc::new(
        CollectionLoopBuilder::new()
            .source(source)
            .store(store.clone())
            .health(health.clone())
            .build()
            .unwrap(),
    );

    let cancel = CancellationToken::new();
    let task = {
        let collection_loop = collection_loop.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            collection_loop
                .run_continuous(Duration::from_secs(300), cancel)
                .await
        })
    };

    for expected in 1..=3 {
        assert_eq!(rx.recv().await, Some(expected));
    }
    cancel.cancel();

    let cycles = task.await.unwrap();
    assert!(cycles >= 3);
    assert!(store.len().await >= 3);
    assert_eq!(
        health.status_of(components::COLLECTOR).await,
        Some(ComponentStatus::Degraded)
    );
}

/// Blocks each listing until the test releases it
struct GatedSource {
    entered: mpsc::UnboundedSender<()>,
    gate: tokio::sync::Semaphore,
}

#[async_trait]
impl WorkloadSource for GatedSource {
    async fn list_workloads(&self) -> Result<Vec<WorkloadRecord>, SourceError> {
        let _ = self.entered.send(());
        self.gate
            .acquire()
            .await
            .expect("gate closed")
            .forget();
        Ok(vec![started("default", "gated", 12)])
    }
}

/// Panics on the first listing
struct PanickingSource;

#[async_trait]
impl WorkloadSource for PanickingSource {
    async fn list_workloads(&self) -> Result<Vec<WorkloadRecord>, SourceError> {
        panic!("kubectl output handler crashed");
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_cycle() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = Arc::new(GatedSource {
        entered: tx,
        gate: tokio::sync::Semaphore::new(0),
    });
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let collection_loop = Arc::new(build_loop(source.clone(), store.clone()));
    let coordinator = Arc::new(RunCoordinator::default());

    let run_id = match coordinator
        .spawn_run(collection_loop, RunParams::new(60, 60))
        .await
        .unwrap()
    {
        StartOutcome::Started(handle) => handle.run_id,
        StartOutcome::AlreadyInProgress { .. } => panic!("slot should be free"),
    };
    assert_eq!(rx.recv().await, Some(()));

    let shutdown = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.shutdown().await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!shutdown.is_finished(), "shutdown returned mid-cycle");
    assert!(coordinator.is_active().await);

    source.gate.add_permits(1);
    let run = shutdown.await.unwrap().expect("an active run was stopped");

    assert_eq!(run.id, run_id);
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.cancelled);
    assert_eq!(run.iterations_completed, 1);
    assert_eq!(run.samples_collected, 1);
    assert_eq!(store.len().await, 1);
    assert!(!coordinator.is_active().await);
    assert_eq!(coordinator.status().await.recent_runs[0].id, run_id);
}

#[tokio::test]
async fn test_shutdown_without_active_run() {
    let coordinator = RunCoordinator::default();
    assert!(coordinator.shutdown().await.is_none());
}

#[tokio::test]
async fn test_panicking_run_releases_slot() {
    let store = Arc::new(WindowStore::in_memory(DEFAULT_RETENTION));
    let collection_loop = Arc::new(build_loop(Arc::new(PanickingSource), store.clone()));
    let coordinator = Arc::new(RunCoordinator::default());

    let handle = match coordinator
        .spawn_run(collection_loop.clone(), RunParams::new(5, 60))
        .await
        .unwrap()
    {
        StartOutcome::Started(handle) => handle,
        StartOutcome::AlreadyInProgress { .. } => panic!("slot should be free"),
    };

    let run = handle.join.await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("run task died"));
    assert!(!coordinator.is_active().await);
    assert_eq!(coordinator.status().await.recent_runs[0].id, run.id);

    // The slot is free for the next run
    assert!(matches!(
        coordinator.try_start(&RunParams::new(5, 60)).await.unwrap(),
        StartOutcome::Started(_)
    ));
}
