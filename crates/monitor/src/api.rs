//! HTTP API for health checks, Prometheus metrics and run control

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use monitor_lib::{
    collector::{CollectionLoop, RunCoordinator, RunParams, StartOutcome},
    health::{ComponentStatus, HealthRegistry},
    observability::MonitorMetrics,
    report::{QueueTimeReport, ReportOptions, StatsInput},
    store::WindowStore,
    RunError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: MonitorMetrics,
    pub store: Arc<WindowStore>,
    pub coordinator: Arc<RunCoordinator>,
    pub collection_loop: Arc<CollectionLoop>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: MonitorMetrics,
        coordinator: Arc<RunCoordinator>,
        collection_loop: Arc<CollectionLoop>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            store: collection_loop.store().clone(),
            coordinator,
            collection_loop,
        }
    }
}

/// Error body for non-2xx answers
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ApiError {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            run_id: None,
        }
    }
}

/// Body of a successful start or cancel request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_top")]
    pub top: usize,
    #[serde(default)]
    pub raw: bool,
}

fn default_top() -> usize {
    10
}

/// Health check response - returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics.set_store_samples(state.store.len().await);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// `{active, currentRun, recentRuns}`
async fn run_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.status().await)
}

/// Start a bounded run: 202 started, 409 already in progress, 400 bad parameters
async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(params): Json<RunParams>,
) -> Response {
    let outcome = state
        .coordinator
        .spawn_run(state.collection_loop.clone(), params)
        .await;

    match outcome {
        Ok(StartOutcome::Started(handle)) => {
            info!(run_id = %handle.run_id, "Collection run accepted");
            (
                StatusCode::ACCEPTED,
                Json(RunAccepted {
                    run_id: handle.run_id,
                    status: "started".to_string(),
                }),
            )
                .into_response()
        }
        Ok(StartOutcome::AlreadyInProgress { run_id }) => (
            StatusCode::CONFLICT,
            Json(ApiError {
                error: "a collection run is already in progress".to_string(),
                run_id: Some(run_id),
            }),
        )
            .into_response(),
        Err(e @ RunError::InvalidConfig(_)) => {
            (StatusCode::BAD_REQUEST, Json(ApiError::new(e.to_string()))).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to start collection run");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn cancel_run(State(state): State<Arc<AppState>>) -> Response {
    match state.coordinator.cancel_current().await {
        Some(run_id) => (
            StatusCode::OK,
            Json(RunAccepted {
                run_id,
                status: "cancelling".to_string(),
            }),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("no collection run is active")),
        )
            .into_response(),
    }
}

/// Aggregate statistics over the window store
async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    let samples = state.store.all().await;
    let options = ReportOptions {
        input: StatsInput::from_raw_flag(query.raw),
        top_n: query.top,
        ..Default::default()
    };

    Json(QueueTimeReport::build(&samples, &options, chrono::Utc::now()))
}

async fn store_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(run_status))
        .route("/api/v1/runs", post(start_run))
        .route("/api/v1/runs/cancel", post(cancel_run))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/store", get(store_stats))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` is cancelled
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
