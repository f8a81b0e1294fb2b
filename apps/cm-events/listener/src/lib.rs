//! CM Events Listener Service
//!
//! Consumes the CM data-change diverted queue and republishes each
//! classified notification for subscribed-event consumers.
//!
//! ## Architecture
//!
//! ```text
//! CmDataChangeDivertedQueue (JetStream stream)
//!   ↓ (N pull slots on one durable)
//! QueueConnector
//!   ↓ on_message
//! CmDataChangeListener (count → classify → batched ack)
//!   ↓
//! NatsEventForwarder → <CM_EVENTS_FORWARD_SUBJECT>.<variant>
//! ```
//!
//! ## Environment
//!
//! - `BROKER`: `nats` (default) or `memory`
//! - `NATS_URL`, `NATS_CONNECTION_NAME`
//! - `CM_EVENTS_FORWARD_SUBJECT`: defaults to `cm.subscribed.events`
//! - `sdk.eventbus.jms.concurrent.queue.listeners.number.CmDataChangeDivertedQueue`:
//!   consumer count
//! - `HEALTH_HOST`, `HEALTH_PORT`

pub mod config;
pub mod forwarder;

pub use config::{BrokerKind, ListenerConfig};
pub use forwarder::NatsEventForwarder;

use axum::Router;
use core_config::{app_info, Environment, FromEnv};
use domain_cm_events::{
    CmDataChangeDivertedQueue, CmDataChangeListener, LoggingEventsProcessor,
    SubscribedEventsProcessor,
};
use eyre::{eyre, Result, WrapErr};
use queue_connector::nats::{NatsBrokerConfig, NatsNamingContext};
use queue_connector::{
    health_router, init_metrics, AckBatcher, ConnectorConfig, ConnectorMetrics, HealthState,
    InMemoryBroker, NamingContext, QueueConnector, QueueDef,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, addr: String) -> Result<()> {
    let app: Router = health_router(health_state);

    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(addr = %addr, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Naming context and downstream processor for the configured broker.
async fn broker_components(
    config: &ListenerConfig,
    ack_threshold: u64,
) -> Result<(Arc<dyn NamingContext>, Arc<dyn SubscribedEventsProcessor>)> {
    match config.broker {
        BrokerKind::Nats => {
            let broker_config = NatsBrokerConfig::from_nats_config(&config.nats);
            info!(
                url = %broker_config.url,
                durable = %broker_config.durable_name,
                "Using NATS JetStream broker"
            );
            broker_config.warn_on_batching_risks(ack_threshold);

            let forwarder =
                NatsEventForwarder::connect(&config.nats, config.forward_subject.clone())
                    .await
                    .wrap_err("Failed to create event forwarder")?;

            Ok((
                Arc::new(NatsNamingContext::new(broker_config)),
                Arc::new(forwarder),
            ))
        }
        BrokerKind::Memory => {
            warn!("Using in-memory broker, notifications are only logged");
            let broker = InMemoryBroker::new();
            broker.declare_queue(CmDataChangeDivertedQueue::QUEUE_NAME);

            Ok((Arc::new(broker), Arc::new(LoggingEventsProcessor)))
        }
    }
}

/// Run the CM events listener
///
/// 1. Sets up error reports and structured logging
/// 2. Builds the connector for the diverted queue
/// 3. Starts it and serves health probes until SIGINT/SIGTERM
/// 4. Stops the connector
///
/// # Errors
///
/// Returns an error if configuration is invalid, the forwarder cannot
/// connect, or the connector fails to start.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting CM events listener");

    let config = ListenerConfig::from_env().wrap_err("Failed to load listener configuration")?;
    let connector_config = ConnectorConfig::from_queue_def::<CmDataChangeDivertedQueue>();
    info!(
        broker = %config.broker,
        queue = %connector_config.queue_name,
        destination = %connector_config.destination_uri,
        concurrency_property = %connector_config.concurrency_property(),
        ack_threshold = connector_config.ack_threshold,
        "Connector configuration loaded"
    );

    let (naming, processor) = broker_components(&config, connector_config.ack_threshold).await?;

    let batcher = Arc::new(
        AckBatcher::new(connector_config.ack_threshold)
            .with_metrics(ConnectorMetrics::new(CmDataChangeDivertedQueue::QUEUE_NAME)),
    );
    let listener = Arc::new(CmDataChangeListener::new(processor, Arc::clone(&batcher)));
    let connector = Arc::new(QueueConnector::new(connector_config, naming, listener));

    if !connector.start().await {
        return Err(eyre!(
            "Failed to start consumers for {}",
            CmDataChangeDivertedQueue::QUEUE_NAME
        ));
    }

    let health_state = HealthState::new(Arc::clone(&connector), app_info.name, app_info.version)
        .with_batcher(batcher);
    let addr = config.health.address();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, addr).await {
            error!(error = %e, "Health server failed");
        }
    });

    if let Err(e) = shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }

    connector.stop().await;
    info!("CM events listener stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .wrap_err("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.wrap_err("Failed to install Ctrl+C handler")?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
