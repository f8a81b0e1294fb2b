//! Health endpoints for K8s probes.
//!
//! - `/health`, `/healthz`: liveness, 200 while the process serves requests
//! - `/ready`, `/readyz`: readiness, 200 only while the connector is active
//! - `/metrics`: Prometheus exposition

use crate::ack::AckBatcher;
use crate::connector::{LifecycleState, QueueConnector};
use crate::metrics::render_metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state of the health endpoints.
#[derive(Clone)]
pub struct HealthState {
    connector: Arc<QueueConnector>,
    batcher: Option<Arc<AckBatcher>>,
    app_name: String,
    app_version: String,
}

impl HealthState {
    pub fn new(
        connector: Arc<QueueConnector>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            batcher: None,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }

    /// Report pending acknowledgments from this batcher.
    pub fn with_batcher(mut self, batcher: Arc<AckBatcher>) -> Self {
        self.batcher = Some(batcher);
        self
    }
}

#[derive(Debug, Serialize)]
struct LivenessResponse<'a> {
    status: &'static str,
    name: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse<'a> {
    state: LifecycleState,
    queue: &'a str,
    consumers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_acknowledgements: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_acknowledgements: Option<u64>,
}

/// Build the health router.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    Json(LivenessResponse {
        status: "ok",
        name: &state.app_name,
        version: &state.app_version,
    })
    .into_response()
}

async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let lifecycle = state.connector.state();
    let body = ReadinessResponse {
        state: lifecycle,
        queue: &state.connector.config().queue_name,
        consumers: state.connector.consumer_count(),
        pending_acknowledgements: state.batcher.as_ref().map(|b| b.pending()),
        failed_acknowledgements: state.batcher.as_ref().map(|b| b.failed_flush_count()),
    };

    let status = if lifecycle == LifecycleState::Active {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn metrics_handler() -> impl IntoResponse {
    render_metrics()
}
