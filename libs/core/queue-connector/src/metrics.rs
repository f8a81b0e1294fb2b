//! Prometheus metrics for queue connectors.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops. If another
/// recorder is already installed the failure is logged and metrics stay
/// unrendered.
pub fn init_metrics() {
    let result = PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
    });

    if let Err(e) = result {
        warn!(error = %e, "Failed to install Prometheus recorder");
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Per-queue metrics helper
#[derive(Clone, Debug)]
pub struct ConnectorMetrics {
    queue_name: String,
}

impl ConnectorMetrics {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// A non-empty message was received
    pub fn message_received(&self) {
        counter!(
            "queue_connector_messages_received_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
    }

    /// A message was classified and handed to the processor
    pub fn message_handled(&self, variant: &'static str) {
        counter!(
            "queue_connector_messages_handled_total",
            "queue" => self.queue_name.clone(),
            "variant" => variant
        )
        .increment(1);
    }

    /// A message was dropped without reaching the processor
    pub fn message_dropped(&self, reason: &'static str) {
        counter!(
            "queue_connector_messages_dropped_total",
            "queue" => self.queue_name.clone(),
            "reason" => reason
        )
        .increment(1);
    }

    /// Processing a message failed
    pub fn message_failed(&self) {
        counter!(
            "queue_connector_messages_failed_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
    }

    /// A batch acknowledgment was flushed
    pub fn ack_flushed(&self, batch: u64) {
        counter!(
            "queue_connector_ack_flushes_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
        counter!(
            "queue_connector_acknowledged_messages_total",
            "queue" => self.queue_name.clone()
        )
        .increment(batch);
    }

    /// A batch acknowledgment failed
    pub fn ack_failed(&self) {
        counter!(
            "queue_connector_ack_failures_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
    }

    /// Number of registered consumers
    pub fn active_consumers(&self, count: usize) {
        gauge!(
            "queue_connector_active_consumers",
            "queue" => self.queue_name.clone()
        )
        .set(count as f64);
    }

    /// Startup aborted
    pub fn start_failed(&self, kind: &'static str) {
        counter!(
            "queue_connector_start_failures_total",
            "queue" => self.queue_name.clone(),
            "kind" => kind
        )
        .increment(1);
    }

    /// A close step failed during shutdown
    pub fn shutdown_failed(&self) {
        counter!(
            "queue_connector_shutdown_failures_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
    }
}
