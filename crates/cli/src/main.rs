//! Queue-time monitor CLI
//!
//! A command-line tool for collecting pod queue times from a cluster,
//! building reports from a history file and driving a running
//! queue-monitor daemon.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{collect, daemon, report};
use monitor_lib::collector::RunParams;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Queue-time monitor CLI
#[derive(Parser)]
#[command(name = "qtm")]
#[command(author, version, about = "CLI for the Kubernetes queue-time monitor", long_about = None)]
pub struct Cli {
    /// Daemon URL (can also be set via QTM_API_URL env var or the config file)
    #[arg(long, env = "QTM_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a bounded collection against the cluster and report on it
    Collect {
        /// Total collection time in minutes
        #[arg(long, short, default_value_t = 60)]
        duration: i64,

        /// Seconds between collection cycles
        #[arg(long, short, default_value_t = 300)]
        interval: i64,

        /// Namespaces to skip (comma-separated, defaults to kube-system)
        #[arg(long, short, value_delimiter = ',')]
        exclude: Vec<String>,

        /// History file (defaults to the config file, then ~/k8s-queue-monitor-data)
        #[arg(long)]
        history: Option<PathBuf>,

        /// Days of history to retain
        #[arg(long, default_value_t = 7)]
        retention_days: u64,

        /// kubectl executable
        #[arg(long, default_value = "kubectl")]
        kubectl: PathBuf,

        /// Path to kubeconfig file (uses kubectl's default if not specified)
        #[arg(long, env = "KUBECONFIG")]
        kubeconfig: Option<PathBuf>,

        /// Timeout for one kubectl call in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Directory to export the report CSV files into
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Number of longest-queued pods to show
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Compute statistics over every observation instead of one per pod
        #[arg(long)]
        raw: bool,
    },

    /// Build a report from a history file
    Report {
        /// History file (defaults to the config file, then ~/k8s-queue-monitor-data)
        #[arg(long)]
        history: Option<PathBuf>,

        /// Directory to export the report CSV files into
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Number of longest-queued pods to show
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Compute statistics over every observation instead of one per pod
        #[arg(long)]
        raw: bool,

        /// Only consider samples from the last N days
        #[arg(long, default_value_t = 7)]
        days: u64,
    },

    /// Show the daemon's active and recent runs
    Status,

    /// Start a bounded run on the daemon
    Start {
        /// Total collection time in minutes
        #[arg(long, short)]
        duration: i64,

        /// Seconds between collection cycles
        #[arg(long, short)]
        interval: i64,

        /// Namespaces to skip (comma-separated, defaults to kube-system)
        #[arg(long, short, value_delimiter = ',')]
        exclude: Vec<String>,
    },

    /// Cancel the daemon's active run
    Cancel,

    /// Show statistics over the daemon's retained window
    Stats {
        /// Number of longest-queued pods to show
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Compute statistics over every observation instead of one per pod
        #[arg(long)]
        raw: bool,
    },

    /// Show the daemon's window store
    Store,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info"
    } else {
        "warn,monitor_lib::collector=info"
    };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::Config::load()?;
    let api_url = config.api_url(cli.api_url.as_deref());
    let format = cli.format;
    debug!(api_url = %api_url, "Resolved configuration");

    // Execute command
    match cli.command {
        Commands::Collect {
            duration,
            interval,
            exclude,
            history,
            retention_days,
            kubectl,
            kubeconfig,
            timeout,
            output,
            top,
            raw,
        } => {
            let args = collect::CollectArgs {
                duration_minutes: duration,
                interval_seconds: interval,
                exclude,
                history: config.history_path(history.as_deref()),
                retention_days,
                kubectl,
                kubeconfig,
                timeout_secs: timeout,
                output,
                top,
                raw,
            };
            collect::collect(&args, format).await?;
        }
        Commands::Report {
            history,
            output,
            top,
            raw,
            days,
        } => {
            let args = report::ReportArgs {
                history: config.history_path(history.as_deref()),
                output,
                top,
                raw,
                window_days: days,
            };
            report::generate_report(&args, format)?;
        }
        Commands::Status => {
            daemon::show_status(&client::ApiClient::new(&api_url)?, format).await?;
        }
        Commands::Start {
            duration,
            interval,
            exclude,
        } => {
            let params = RunParams::new(duration, interval).excluding(exclude);
            daemon::start_run(&client::ApiClient::new(&api_url)?, &params, format).await?;
        }
        Commands::Cancel => {
            daemon::cancel_run(&client::ApiClient::new(&api_url)?, format).await?;
        }
        Commands::Stats { top, raw } => {
            daemon::show_stats(&client::ApiClient::new(&api_url)?, top, raw, format).await?;
        }
        Commands::Store => {
            daemon::show_store(&client::ApiClient::new(&api_url)?, format).await?;
        }
    }

    Ok(())
}
