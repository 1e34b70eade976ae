//! API client for the queue monitor daemon

use anyhow::{Context, Result};
use monitor_lib::collector::{RunParams, RunStatusReport};
use monitor_lib::report::QueueTimeReport;
use monitor_lib::store::StoreStats;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the queue monitor daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<RunStatusReport> {
        self.get("api/v1/status").await
    }

    pub async fn start_run(&self, params: &RunParams) -> Result<RunAccepted> {
        self.post("api/v1/runs", params).await
    }

    pub async fn cancel_run(&self) -> Result<RunAccepted> {
        self.post("api/v1/runs/cancel", &serde_json::json!({})).await
    }

    pub async fn stats(&self, top: usize, raw: bool) -> Result<QueueTimeReport> {
        self.get(&format!("api/v1/stats?top={}&raw={}", top, raw))
            .await
    }

    pub async fn store_stats(&self) -> Result<StoreStats> {
        self.get("api/v1/store").await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}
