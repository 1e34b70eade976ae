//! Monitor configuration

use anyhow::{ensure, Context, Result};
use monitor_lib::sampler::SamplerConfig;
use monitor_lib::store::HISTORY_FILE_NAME;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `K8S_QUEUE_MONITOR_API_PORT`
pub const ENV_PREFIX: &str = "K8S_QUEUE_MONITOR";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// API server port for health, metrics and run control
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding the persisted history
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_kubectl_path")]
    pub kubectl_path: String,

    /// Passed to kubectl as `--kubeconfig` when set
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default = "default_sanity_ceiling_days")]
    pub sanity_ceiling_days: u64,

    #[serde(default = "default_excluded_namespaces")]
    pub excluded_namespaces: Vec<String>,

    /// Cadence of the continuous collector
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    /// Run the continuous background collector
    #[serde(default = "default_continuous")]
    pub continuous: bool,

    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,

    #[serde(default = "default_max_recent_runs")]
    pub max_recent_runs: usize,
}

fn default_api_port() -> u16 {
    8080
}

fn default_output_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("k8s-queue-monitor-data")
}

fn default_kubectl_path() -> String {
    "kubectl".to_string()
}

fn default_retention_days() -> u64 {
    7
}

fn default_sanity_ceiling_days() -> u64 {
    30
}

fn default_excluded_namespaces() -> Vec<String> {
    vec!["kube-system".to_string()]
}

fn default_collection_interval() -> u64 {
    300
}

fn default_continuous() -> bool {
    true
}

fn default_source_timeout() -> u64 {
    60
}

fn default_max_recent_runs() -> usize {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            output_dir: default_output_dir(),
            kubectl_path: default_kubectl_path(),
            kubeconfig: None,
            retention_days: default_retention_days(),
            sanity_ceiling_days: default_sanity_ceiling_days(),
            excluded_namespaces: default_excluded_namespaces(),
            collection_interval_secs: default_collection_interval(),
            continuous: default_continuous(),
            source_timeout_secs: default_source_timeout(),
            max_recent_runs: default_max_recent_runs(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `K8S_QUEUE_MONITOR_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from an environment source; list values are comma-separated
    pub fn from_env(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                env.try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("excluded_namespaces"),
            )
            .build()
            .context("failed to read monitor configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("invalid monitor configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.retention_days > 0, "retention_days must be positive");
        ensure!(
            self.sanity_ceiling_days > 0,
            "sanity_ceiling_days must be positive"
        );
        ensure!(
            self.collection_interval_secs > 0,
            "collection_interval_secs must be positive"
        );
        ensure!(
            self.source_timeout_secs > 0,
            "source_timeout_secs must be positive"
        );
        Ok(())
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join(HISTORY_FILE_NAME)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        let mut sampler = SamplerConfig::with_excluded(self.excluded_namespaces.iter().cloned());
        sampler.sanity_ceiling =
            Duration::from_secs(self.sanity_ceiling_days.saturating_mul(SECS_PER_DAY));
        sampler
    }

    /// Label for log records: the kubeconfig file, or the ambient context
    pub fn cluster_label(&self) -> String {
        self.kubeconfig
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "current-context".to_string())
    }
}
