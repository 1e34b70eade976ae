//! Queue Monitor - Kubernetes pod queue time collector
//!
//! Samples pod queue times through kubectl on a fixed cadence, keeps a
//! retention-bounded history on disk and serves statistics over HTTP.

use anyhow::{Context, Result};
use chrono::Utc;
use monitor_lib::{
    collector::{CollectionLoopBuilder, RunCoordinator},
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    sampler::Sampler,
    source::KubectlSource,
    store::WindowStore,
};
use queue_monitor::{api, config::MonitorConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting queue-monitor");

    let config = MonitorConfig::load()?;
    info!(
        output_dir = %config.output_dir.display(),
        retention_days = config.retention_days,
        continuous = config.continuous,
        "Monitor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::STORE).await;

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(config.cluster_label());

    let history_path = config.history_path();
    let (store, load_report) = WindowStore::open(&history_path, config.retention(), Utc::now())
        .with_context(|| format!("failed to load history from {}", history_path.display()))?;
    let store = Arc::new(store);
    metrics.set_store_samples(load_report.loaded);

    let mut source = KubectlSource::new(&config.kubectl_path).with_timeout(config.source_timeout());
    if let Some(kubeconfig) = &config.kubeconfig {
        source = source.with_kubeconfig(kubeconfig);
    }

    let collection_loop = Arc::new(
        CollectionLoopBuilder::new()
            .source(Arc::new(source))
            .store(store)
            .sampler(Sampler::new(config.sampler_config()))
            .health(health_registry.clone())
            .logger(logger.clone())
            .build()?,
    );
    let coordinator =
        Arc::new(RunCoordinator::new(config.max_recent_runs).with_logger(logger.clone()));

    logger.log_startup(
        MONITOR_VERSION,
        &history_path.display().to_string(),
        load_report.loaded,
    );

    let shutdown = CancellationToken::new();

    let collector_handle = if config.continuous {
        let collection_loop = collection_loop.clone();
        let cancel = shutdown.child_token();
        let interval = config.collection_interval();
        Some(tokio::spawn(async move {
            collection_loop.run_continuous(interval, cancel).await
        }))
    } else {
        health_registry
            .set_degraded(components::COLLECTOR, "continuous collection disabled")
            .await;
        None
    };

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        coordinator.clone(),
        collection_loop,
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    if let Some(run) = coordinator.shutdown().await {
        info!(run_id = %run.id, status = run.status.as_str(), "Active run stopped");
    }
    shutdown.cancel();

    if let Some(handle) = collector_handle {
        match handle.await {
            Ok(cycles) => info!(cycles = cycles, "Continuous collector stopped"),
            Err(e) => error!(error = %e, "Continuous collector task failed"),
        }
    }
    api_handle.await??;

    info!("Shutdown complete");
    Ok(())
}
