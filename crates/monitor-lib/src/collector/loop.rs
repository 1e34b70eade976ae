//! Queue time collection loop
//!
//! Drives the sampler against the cluster data source, either for a bounded
//! run of `iterations` cycles or continuously until cancelled. Cycles are
//! strictly sequential and cancellation is only observed while sleeping
//! between them, so a cycle always completes as a whole.

use super::run::{RunPlan, RunTracker};
use crate::aggregate;
use crate::error::{SourceError, StoreError};
use crate::health::{components, HealthRegistry};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::sampler::Sampler;
use crate::source::WorkloadSource;
use crate::store::WindowStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-cycle summary of the samples that reached the store
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub count: usize,
    pub namespaces: usize,
    pub mean_secs: f64,
    pub max_secs: f64,
    /// `namespace/name` of the longest-queued workload in this cycle
    pub slowest: String,
    pub evicted: usize,
}

/// Result of one collection cycle that did not hit a storage failure
#[derive(Debug)]
pub enum CycleOutcome {
    Collected(CycleSummary),
    /// The source answered but no started workload survived sampling
    NoSamples,
    /// The data-source call failed; nothing was sampled
    SourceFailed(SourceError),
}

/// Collection loop over one source and one store
pub struct CollectionLoop {
    source: Arc<dyn WorkloadSource>,
    store: Arc<WindowStore>,
    sampler: Sampler,
    metrics: MonitorMetrics,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl CollectionLoop {
    pub fn new(source: Arc<dyn WorkloadSource>, store: Arc<WindowStore>, sampler: Sampler) -> Self {
        Self {
            source,
            store,
            sampler,
            metrics: MonitorMetrics::new(),
            health: None,
            logger: StructuredLogger::default(),
        }
    }

    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    /// Default sampler, used by the continuous loop
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    async fn set_health(&self, component: &str, problem: Option<String>) {
        if let Some(health) = &self.health {
            match problem {
                None => health.set_healthy(component).await,
                Some(msg) if component == components::STORE => {
                    health.set_unhealthy(component, msg).await
                }
                Some(msg) => health.set_degraded(component, msg).await,
            }
        }
    }

    /// Run one cycle: list, sample, append, evict
    ///
    /// A data-source failure is an `Ok(SourceFailed)` outcome. Only storage
    /// failures are errors.
    pub async fn run_cycle(
        &self,
        iteration: u64,
        sampler: &Sampler,
    ) -> std::result::Result<CycleOutcome, StoreError> {
        let at = Utc::now();
        let started = Instant::now();

        let batch = match sampler.collect(self.source.as_ref(), at).await {
            Ok(batch) => batch,
            Err(e) => {
                self.metrics.inc_cycle_errors();
                self.set_health(components::SOURCE, Some(e.to_string())).await;
                warn!(iteration = iteration, error = %e, "Collection cycle failed");
                return Ok(CycleOutcome::SourceFailed(e));
            }
        };

        self.metrics
            .observe_cycle_duration(started.elapsed().as_secs_f64());
        self.set_health(components::SOURCE, None).await;
        for (reason, _) in &batch.rejected {
            self.metrics.inc_rejected(reason.as_str());
        }

        debug!(
            iteration = iteration,
            samples = batch.samples.len(),
            excluded = batch.excluded,
            pending = batch.pending,
            rejected = batch.rejected.len(),
            "Sampled cluster snapshot"
        );

        let summary = aggregate::overall(&batch.samples);
        if !batch.is_empty() {
            if let Err(e) = self.store.append(&batch.samples).await {
                self.set_health(components::STORE, Some(e.to_string())).await;
                return Err(e);
            }
            self.metrics
                .record_samples(batch.samples.iter().map(|s| &s.queue_time_secs));
        }

        let evicted = match self.store.evict_expired(at).await {
            Ok(evicted) => evicted,
            Err(e) => {
                self.set_health(components::STORE, Some(e.to_string())).await;
                return Err(e);
            }
        };
        self.set_health(components::STORE, None).await;
        self.metrics.set_store_samples(self.store.len().await);

        let Some(stats) = summary else {
            return Ok(CycleOutcome::NoSamples);
        };

        let summary = CycleSummary {
            count: stats.count,
            namespaces: stats.namespace_count,
            mean_secs: stats.mean.seconds,
            max_secs: stats.max.seconds,
            slowest: format!("{}/{}", stats.argmax.namespace, stats.argmax.name),
            evicted,
        };
        self.logger.log_cycle(
            iteration,
            summary.count,
            summary.namespaces,
            summary.mean_secs,
            summary.max_secs,
            &summary.slowest,
        );

        Ok(CycleOutcome::Collected(summary))
    }

    /// Run a bounded session and leave the tracker in a terminal state
    ///
    /// Sleeps between iterations but never after the last one. A failed
    /// data-source call is logged and skipped; a storage failure fails the run.
    pub async fn run_bounded(
        &self,
        plan: &RunPlan,
        sampler: &Sampler,
        tracker: &RunTracker,
        cancel: &CancellationToken,
    ) {
        tracker
            .log(format!(
                "Starting collection: {} iterations every {} seconds",
                plan.iterations,
                plan.interval.as_secs()
            ))
            .await;

        if plan.iterations == 0 {
            tracker
                .log("Interval is longer than the duration, nothing to collect")
                .await;
            tracker.complete(false).await;
            return;
        }

        for iteration in 1..=plan.iterations {
            match self.run_cycle(iteration, sampler).await {
                Ok(CycleOutcome::Collected(summary)) => {
                    tracker.record_cycle(summary.count).await;
                    tracker
                        .log(format!(
                            "Iteration {}/{}: {} pods across {} namespaces, mean {}, max {} ({})",
                            iteration,
                            plan.iterations,
                            summary.count,
                            summary.namespaces,
                            aggregate::DurationBreakdown::from_secs(summary.mean_secs),
                            aggregate::DurationBreakdown::from_secs(summary.max_secs),
                            summary.slowest
                        ))
                        .await;
                }
                Ok(CycleOutcome::NoSamples) => {
                    tracker.record_cycle(0).await;
                    tracker
                        .log(format!(
                            "Iteration {}/{}: no started pods found",
                            iteration, plan.iterations
                        ))
                        .await;
                }
                Ok(CycleOutcome::SourceFailed(e)) => {
                    tracker.record_failed_cycle().await;
                    tracker
                        .log(format!(
                            "Iteration {}/{} failed: {}",
                            iteration, plan.iterations, e
                        ))
                        .await;
                }
                Err(e) => {
                    error!(run_id = %tracker.id(), error = %e, "Storage failure, aborting run");
                    tracker.log(format!("Storage failure: {}", e)).await;
                    tracker.fail(e.to_string()).await;
                    return;
                }
            }

            if iteration == plan.iterations {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(plan.interval) => {}
                _ = cancel.cancelled() => {
                    tracker
                        .log(format!(
                            "Cancelled after {} of {} iterations",
                            iteration, plan.iterations
                        ))
                        .await;
                    tracker.complete(true).await;
                    return;
                }
            }
        }

        let run = tracker.snapshot().await;
        tracker
            .log(format!(
                "Collection completed: {} samples in {} iterations ({} failed)",
                run.samples_collected, run.iterations_completed, run.failed_cycles
            ))
            .await;
        tracker.complete(false).await;
    }

    /// Collect every `interval` until cancelled; returns the cycles run
    ///
    /// Storage failures are logged and retried on the next cycle.
    pub async fn run_continuous(&self, interval: Duration, cancel: CancellationToken) -> u64 {
        info!(
            interval_secs = interval.as_secs(),
            "Starting continuous queue time collection"
        );
        self.set_health(components::COLLECTOR, None).await;

        let mut iteration = 0u64;
        loop {
            iteration += 1;
            match self.run_cycle(iteration, &self.sampler).await {
                Ok(CycleOutcome::NoSamples) => {
                    debug!(iteration = iteration, "No started pods found");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(iteration = iteration, error = %e, "Failed to persist samples");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    info!(cycles = iteration, "Shutting down continuous collection");
                    break;
                }
            }
        }

        if let Some(health) = &self.health {
            health
                .set_degraded(components::COLLECTOR, "continuous collection stopped")
                .await;
        }
        iteration
    }
}

/// Builder for the collection loop
pub struct CollectionLoopBuilder {
    source: Option<Arc<dyn WorkloadSource>>,
    store: Option<Arc<WindowStore>>,
    sampler: Sampler,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            store: None,
            sampler: Sampler::default(),
            health: None,
            logger: None,
        }
    }

    /// Set the cluster data source
    pub fn source(mut self, source: Arc<dyn WorkloadSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the window store
    pub fn store(mut self, store: Arc<WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the default sampler
    pub fn sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Report component health into this registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<CollectionLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Workload source is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Window store is required"))?;

        let mut collection_loop = CollectionLoop::new(source, store, self.sampler);
        collection_loop.health = self.health;
        if let Some(logger) = self.logger {
            collection_loop.logger = logger;
        }
        Ok(collection_loop)
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
