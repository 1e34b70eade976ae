//! Local bounded collection

use anyhow::{Context, Result};
use chrono::Utc;
use monitor_lib::collector::{
    CollectionLoopBuilder, CollectionRun, RunCoordinator, RunParams, RunStatus, StartOutcome,
};
use monitor_lib::report::{QueueTimeReport, ReportOptions, StatsInput};
use monitor_lib::source::KubectlSource;
use monitor_lib::store::WindowStore;
use monitor_lib::Sample;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::report::{export, render_report};
use crate::output::{color_status, print_info, print_warning, OutputFormat};

/// Options of the `collect` command
#[derive(Debug, Clone)]
pub struct CollectArgs {
    pub duration_minutes: i64,
    pub interval_seconds: i64,
    pub exclude: Vec<String>,
    pub history: PathBuf,
    pub retention_days: u64,
    pub kubectl: PathBuf,
    pub kubeconfig: Option<PathBuf>,
    pub timeout_secs: u64,
    pub output: Option<PathBuf>,
    pub top: usize,
    pub raw: bool,
}

/// Run one bounded collection against the cluster, then report on it
///
/// Ctrl-C cancels the run at its next sleep; the samples gathered so far
/// are kept and reported.
pub async fn collect(args: &CollectArgs, format: OutputFormat) -> Result<()> {
    let params = RunParams::new(args.duration_minutes, args.interval_seconds)
        .excluding(args.exclude.iter().cloned());
    // Reject bad parameters before touching the history file
    params.plan()?;

    let retention = Duration::from_secs(args.retention_days.saturating_mul(86_400));
    let (store, load_report) = WindowStore::open(&args.history, retention, Utc::now())
        .with_context(|| format!("Failed to load history from {}", args.history.display()))?;
    let store = Arc::new(store);
    print_info(&format!(
        "Loaded {} samples from {}",
        load_report.loaded,
        args.history.display()
    ));

    let mut source =
        KubectlSource::new(&args.kubectl).with_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(kubeconfig) = &args.kubeconfig {
        source = source.with_kubeconfig(kubeconfig);
    }

    let collection_loop = Arc::new(
        CollectionLoopBuilder::new()
            .source(Arc::new(source))
            .store(store.clone())
            .build()?,
    );
    let coordinator = Arc::new(RunCoordinator::default());

    let handle = match coordinator.spawn_run(collection_loop, params).await? {
        StartOutcome::Started(handle) => handle,
        StartOutcome::AlreadyInProgress { run_id } => {
            anyhow::bail!("Collection {} is already in progress", run_id)
        }
    };
    print_info(&format!("Started collection {}", handle.run_id));

    let mut join = handle.join;
    let run = tokio::select! {
        finished = &mut join => finished?,
        _ = tokio::signal::ctrl_c() => {
            print_warning("Interrupted, stopping after the current cycle");
            coordinator.cancel_current().await;
            join.await?
        }
    };

    print_run_summary(&run);

    let samples: Vec<Sample> = store
        .all()
        .await
        .iter()
        .filter(|s| s.timestamp >= run.start_time)
        .cloned()
        .collect();
    let options = ReportOptions {
        input: StatsInput::from_raw_flag(args.raw),
        top_n: args.top,
        ..ReportOptions::default()
    };
    let report = QueueTimeReport::build(&samples, &options, Utc::now());
    render_report(&report, format)?;

    if let Some(dir) = &args.output {
        export(&report, dir, &samples)?;
    }

    if run.status == RunStatus::Failed {
        anyhow::bail!(
            "Collection {} failed: {}",
            run.id,
            run.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_run_summary(run: &CollectionRun) {
    let status = if run.cancelled {
        "cancelled"
    } else {
        run.status.as_str()
    };
    println!();
    println!("Run:                    {}", run.id);
    println!("Status:                 {}", color_status(status));
    println!(
        "Iterations:             {}/{} ({} failed)",
        run.iterations_completed, run.iterations_planned, run.failed_cycles
    );
    println!("Samples collected:      {}", run.samples_collected);
    println!();
}
