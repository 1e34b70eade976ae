//! Commands talking to a running queue-monitor daemon

use anyhow::Result;
use colored::Colorize;
use monitor_lib::collector::{CollectionRun, RunParams};
use tabled::Tabled;

use super::report::render_report;
use crate::client::ApiClient;
use crate::output::{
    color_status, format_duration, format_timestamp, print_heading, print_info, print_json,
    print_success, print_table, OutputFormat,
};

/// Row for the recent runs table
#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Run")]
    id: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Iterations")]
    iterations: String,
    #[tabled(rename = "Samples")]
    samples: u64,
}

impl From<&CollectionRun> for RunRow {
    fn from(run: &CollectionRun) -> Self {
        let status = if run.cancelled {
            "cancelled"
        } else {
            run.status.as_str()
        };
        Self {
            id: run.id.clone(),
            started: format_timestamp(&run.start_time),
            status: color_status(status),
            iterations: format!("{}/{}", run.iterations_completed, run.iterations_planned),
            samples: run.samples_collected,
        }
    }
}

/// Show the active run with its progress log and the recent runs
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_heading("Collection Status");
            match &report.current_run {
                Some(run) => {
                    println!("Active run:             {}", run.id.cyan());
                    println!(
                        "Started:                {}",
                        format_timestamp(&run.start_time)
                    );
                    println!(
                        "Schedule:               {} minutes every {} seconds",
                        run.duration_minutes, run.interval_seconds
                    );
                    println!(
                        "Progress:               {}/{} iterations, {} samples",
                        run.iterations_completed, run.iterations_planned, run.samples_collected
                    );
                    println!();
                    println!("{}", "Log".bold());
                    for line in &run.progress_log {
                        println!("  {}", line);
                    }
                }
                None => println!("Active run:             {}", "none".dimmed()),
            }
            println!();

            println!("{}", "Recent Runs".bold());
            let rows: Vec<RunRow> = report.recent_runs.iter().map(RunRow::from).collect();
            print_table(&rows, "No finished runs");
        }
    }

    Ok(())
}

/// Ask the daemon to start a bounded run
pub async fn start_run(
    client: &ApiClient,
    params: &RunParams,
    format: OutputFormat,
) -> Result<()> {
    let accepted = client.start_run(params).await?;

    match format {
        OutputFormat::Json => print_json(&accepted)?,
        OutputFormat::Table => {
            print_success(&format!("Started collection {}", accepted.run_id.cyan()));
            print_info("Follow progress with `qtm status`");
        }
    }

    Ok(())
}

/// Ask the daemon to cancel the active run
pub async fn cancel_run(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let accepted = client.cancel_run().await?;

    match format {
        OutputFormat::Json => print_json(&accepted)?,
        OutputFormat::Table => print_success(&format!(
            "Collection {} is {}",
            accepted.run_id.cyan(),
            color_status(&accepted.status)
        )),
    }

    Ok(())
}

/// Show statistics over the daemon's retained window
pub async fn show_stats(
    client: &ApiClient,
    top: usize,
    raw: bool,
    format: OutputFormat,
) -> Result<()> {
    let report = client.stats(top, raw).await?;
    render_report(&report, format)
}

/// Show the size and time span of the daemon's window store
pub async fn show_store(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats = client.store_stats().await?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => {
            print_heading("Window Store");
            println!("Entries:                {}", stats.entries);
            println!(
                "Retention:              {}",
                format_duration(stats.retention_seconds as f64)
            );
            let span = |ts: &Option<chrono::DateTime<chrono::Utc>>| {
                ts.as_ref()
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".to_string())
            };
            println!("Oldest sample:          {}", span(&stats.oldest));
            println!("Newest sample:          {}", span(&stats.newest));
            println!(
                "History file:           {}",
                stats
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "in memory".to_string())
            );
        }
    }

    Ok(())
}
