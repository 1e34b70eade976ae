//! Queue time report rendering and the local `report` command

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use colored::Colorize;
use monitor_lib::aggregate::{DurationValue, GroupStats, TopRecord};
use monitor_lib::report::{QueueTimeReport, ReportOptions, StatsInput};
use monitor_lib::store::read_history;
use monitor_lib::Sample;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use crate::output::{
    format_duration, format_timestamp, print_heading, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// Row for the per-namespace table
#[derive(Tabled)]
struct NamespaceRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pods")]
    pods: usize,
    #[tabled(rename = "Unique")]
    unique: usize,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Min")]
    min: String,
}

impl From<&GroupStats> for NamespaceRow {
    fn from(group: &GroupStats) -> Self {
        Self {
            namespace: group.key.clone(),
            pods: group.count,
            unique: group.unique_workload_count,
            mean: group.mean.breakdown.to_string(),
            max: group.max.breakdown.to_string(),
            min: group.min.breakdown.to_string(),
        }
    }
}

/// Row for the top-N table
#[derive(Tabled)]
struct TopPodRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Queue Time")]
    queue_time: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl TopPodRow {
    fn new(rank: usize, record: &TopRecord) -> Self {
        Self {
            rank,
            namespace: record.namespace.clone(),
            pod: record.name.clone(),
            queue_time: record.queue_time.breakdown.to_string(),
            created: format_timestamp(&record.creation_time),
        }
    }
}

/// Options of the `report` command
#[derive(Debug, Clone)]
pub struct ReportArgs {
    pub history: PathBuf,
    pub output: Option<PathBuf>,
    pub top: usize,
    pub raw: bool,
    pub window_days: u64,
}

/// Print a report in the requested format
pub fn render_report(report: &QueueTimeReport, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(report);
    }

    let Some(overall) = &report.overall else {
        print_warning("No queue time data available");
        return Ok(());
    };

    print_heading(&format!(
        "Queue Time Report ({}, {} samples)",
        report.input.as_str(),
        report.sample_count
    ));
    println!(
        "Pods:                   {} ({} unique)",
        overall.count, overall.unique_workload_count
    );
    println!("Namespaces:             {}", overall.namespace_count);
    println!("Mean:                   {}", duration_cell(&overall.mean));
    println!("Median:                 {}", duration_cell(&overall.median));
    println!("Min:                    {}", duration_cell(&overall.min));
    println!(
        "Max:                    {} ({}/{})",
        duration_cell(&overall.max).red(),
        overall.argmax.namespace,
        overall.argmax.name
    );
    println!(
        "Std dev:                {}",
        overall
            .stddev
            .as_ref()
            .map(duration_cell)
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!();

    println!("{}", "By Namespace".bold());
    let rows: Vec<NamespaceRow> = report.by_namespace.iter().map(NamespaceRow::from).collect();
    print_table(&rows, "No namespaces");
    println!();

    println!("{}", format!("Top {} Longest Queued", report.top.len()).bold());
    let rows: Vec<TopPodRow> = report
        .top
        .iter()
        .enumerate()
        .map(|(i, record)| TopPodRow::new(i + 1, record))
        .collect();
    print_table(&rows, "No pods");

    Ok(())
}

fn duration_cell(value: &DurationValue) -> String {
    format_duration(value.seconds)
}

/// Samples observed at or after `now - window_days`
fn within_window(samples: Vec<Sample>, now: DateTime<Utc>, window_days: u64) -> Vec<Sample> {
    let days = i64::try_from(window_days).unwrap_or(i64::MAX);
    let Some(cutoff) = ChronoDuration::try_days(days).and_then(|w| now.checked_sub_signed(w))
    else {
        return samples;
    };
    samples.into_iter().filter(|s| s.timestamp >= cutoff).collect()
}

/// Build a report from a history file without modifying it
pub fn generate_report(args: &ReportArgs, format: OutputFormat) -> Result<()> {
    let samples = load_window(&args.history, args.window_days)?;

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
    Ok(())
}

fn load_window(history: &Path, window_days: u64) -> Result<Vec<Sample>> {
    if !history.exists() {
        anyhow::bail!("History file {} does not exist", history.display());
    }

    let (samples, corrupt) = read_history(history)
        .with_context(|| format!("Failed to read history from {}", history.display()))?;
    if corrupt > 0 {
        print_warning(&format!("Skipped {} unreadable rows", corrupt));
    }

    let total = samples.len();
    let samples = within_window(samples, Utc::now(), window_days);
    print_info(&format!(
        "Loaded {} samples ({} within the last {} days)",
        total,
        samples.len(),
        window_days
    ));
    Ok(samples)
}

/// Write the report CSV files and list them
pub fn export(report: &QueueTimeReport, dir: &Path, samples: &[Sample]) -> Result<()> {
    let written = report
        .write_csv_dir(dir, samples)
        .with_context(|| format!("Failed to export report to {}", dir.display()))?;
    print_success(&format!("Report exported to {}", dir.display()));
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_lib::store::WindowStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample(uid: &str, hours_ago: i64, queue_secs: f64) -> Sample {
        let timestamp = Utc::now() - ChronoDuration::hours(hours_ago);
        Sample {
            timestamp,
            namespace: "batch".to_string(),
            name: format!("job-{}", uid),
            uid: uid.to_string(),
            queue_time_secs: queue_secs,
            creation_time: timestamp - ChronoDuration::minutes(10),
            start_time: timestamp - ChronoDuration::minutes(10)
                + ChronoDuration::seconds(queue_secs as i64),
        }
    }

    #[test]
    fn test_within_window_drops_old_samples() {
        let now = Utc::now();
        let samples = vec![sample("a", 1, 5.0), sample("b", 24 * 8, 7.0)];

        let kept = within_window(samples, now, 7);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].uid, "a");
    }

    #[test]
    fn test_within_window_huge_window_keeps_everything() {
        let samples = vec![sample("a", 1, 5.0), sample("b", 24 * 400, 7.0)];
        assert_eq!(within_window(samples, Utc::now(), u64::MAX).len(), 2);
    }

    #[test]
    fn test_namespace_row_formats_durations() {
        let report = QueueTimeReport::build(
            &[sample("a", 1, 3_725.0)],
            &ReportOptions::default(),
            Utc::now(),
        );

        let row = NamespaceRow::from(&report.by_namespace[0]);
        assert_eq!(row.namespace, "batch");
        assert_eq!(row.pods, 1);
        assert_eq!(row.mean, "0d 1h 2m 5.00s");
    }

    #[test]
    fn test_missing_history_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = load_window(&dir.path().join("missing.csv"), 7).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_generate_report_leaves_history_untouched() {
        let dir = TempDir::new().unwrap();
        let history = dir.path().join("history.csv");
        {
            let store = WindowStore::open(&history, Duration::from_secs(30 * 86_400), Utc::now())
                .unwrap()
                .0;
            tokio_test::assert_ok!(
                store
                    .append(&[sample("a", 1, 5.0), sample("a", 2, 9.0), sample("b", 24 * 10, 4.0)])
                    .await
            );
        }
        let before = std::fs::read_to_string(&history).unwrap();

        let out = dir.path().join("report");
        let args = ReportArgs {
            history: history.clone(),
            output: Some(out.clone()),
            top: 5,
            raw: false,
            window_days: 7,
        };
        generate_report(&args, OutputFormat::Json).unwrap();

        assert_eq!(std::fs::read_to_string(&history).unwrap(), before);
        assert!(out.join(monitor_lib::report::OVERALL_STATS_FILE).exists());

        let queue_times = std::fs::read_to_string(out.join(monitor_lib::report::QUEUE_TIMES_FILE))
            .unwrap();
        // header plus the two in-window rows
        assert_eq!(queue_times.lines().count(), 3);
    }
}
