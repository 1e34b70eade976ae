//! kubectl-backed workload source
//!
//! Shells out to `kubectl get pods --all-namespaces -o json` and maps the
//! pod list into `WorkloadRecord`s.

use super::WorkloadSource;
use crate::error::SourceError;
use crate::models::WorkloadRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Default timeout for a single kubectl invocation
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Workload source that lists pods through the kubectl binary
#[derive(Debug, Clone)]
pub struct KubectlSource {
    kubectl_path: PathBuf,
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl KubectlSource {
    /// Create a source using the given kubectl executable
    pub fn new(kubectl_path: impl Into<PathBuf>) -> Self {
        Self {
            kubectl_path: kubectl_path.into(),
            kubeconfig: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Pass an explicit kubeconfig to every invocation
    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig.display()));
        }
        args.extend(
            ["get", "pods", "--all-namespaces", "-o", "json"]
                .iter()
                .map(|s| s.to_string()),
        );
        args
    }

    fn command_line(&self) -> String {
        format!("{} {}", self.kubectl_path.display(), self.args().join(" "))
    }
}

impl Default for KubectlSource {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl WorkloadSource for KubectlSource {
    async fn list_workloads(&self) -> Result<Vec<WorkloadRecord>, SourceError> {
        let command = self.command_line();
        debug!(command = %command, "Listing pods");

        let output = Command::new(&self.kubectl_path)
            .args(self.args())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| SourceError::Timeout(self.timeout))?
            .map_err(|source| SourceError::Launch {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::NonZeroExit {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_pod_list(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodMetadata {
    namespace: String,
    name: String,
    uid: String,
    creation_timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    start_time: Option<String>,
}

/// Parse a `kubectl get pods -o json` payload
///
/// Any unparseable timestamp fails the whole payload: a cycle is either
/// fully parsed or reported as a single error.
pub fn parse_pod_list(payload: &[u8]) -> Result<Vec<WorkloadRecord>, SourceError> {
    let list: PodList = serde_json::from_slice(payload)?;

    list.items
        .into_iter()
        .map(|pod| {
            let creation_time = parse_timestamp(&pod.metadata.creation_timestamp)?;
            let start_time = pod
                .status
                .and_then(|s| s.start_time)
                .filter(|s| !s.is_empty())
                .map(|s| parse_timestamp(&s))
                .transpose()?;

            Ok(WorkloadRecord {
                namespace: pod.metadata.namespace,
                name: pod.metadata.name,
                uid: pod.metadata.uid,
                creation_time,
                start_time,
            })
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SourceError::Malformed(format!("bad timestamp {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const POD_LIST: &str = r#"{
  "apiVersion": "v1",
  "kind": "List",
  "items": [
    {
      "metadata": {
        "name": "trainer-0",
        "namespace": "ml",
        "uid": "6f1c2b1e-0000-4000-8000-000000000001",
        "creationTimestamp": "2024-03-01T10:00:00Z"
      },
      "status": { "phase": "Running", "startTime": "2024-03-01T10:02:30Z" }
    },
    {
      "metadata": {
        "name": "trainer-1",
        "namespace": "ml",
        "uid": "6f1c2b1e-0000-4000-8000-000000000002",
        "creationTimestamp": "2024-03-01T10:00:00Z"
      },
      "status": { "phase": "Pending" }
    }
  ]
}"#;

    #[test]
    fn test_parse_pod_list() {
        let records = parse_pod_list(POD_LIST.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].namespace, "ml");
        assert_eq!(records[0].name, "trainer-0");
        assert_eq!(
            records[0].start_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 2, 30).unwrap())
        );

        // Pending pods have no start time yet
        assert_eq!(records[1].start_time, None);
    }

    #[test]
    fn test_parse_empty_list_is_not_an_error() {
        let records = parse_pod_list(br#"{"items": []}"#).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_malformed_json() {
        let result = parse_pod_list(b"error: You must be logged in");
        assert!(matches!(result, Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_parse_bad_timestamp_fails_whole_payload() {
        let payload = POD_LIST.replace("2024-03-01T10:02:30Z", "yesterday");
        let result = parse_pod_list(payload.as_bytes());
        assert!(matches!(result, Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_kubectl_args_with_kubeconfig() {
        let source = KubectlSource::new("/usr/local/bin/kubectl").with_kubeconfig("/root/.kube/config");
        assert_eq!(
            source.command_line(),
            "/usr/local/bin/kubectl --kubeconfig=/root/.kube/config get pods --all-namespaces -o json"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let source = KubectlSource::new("/nonexistent/kubectl-binary");
        let result = source.list_workloads().await;
        assert!(matches!(result, Err(SourceError::Launch { .. })));
    }
}
