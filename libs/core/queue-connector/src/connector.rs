//! Lifecycle controller.
//!
//! `QueueConnector` ties the connection manager and the consumer pool
//! together behind two idempotent operations:
//!
//! - `start()`: open connection → create consumers → attach listener
//! - `stop()`: detach listener → close consumers → close sessions → close
//!   connection
//!
//! Start and stop are serialized; concurrent callers wait for each other.

use crate::broker::{MessageListener, NamingContext};
use crate::config::ConnectorConfig;
use crate::connection::ConnectionManager;
use crate::error::ConnectorError;
use crate::metrics::ConnectorMetrics;
use crate::pool::ConsumerPool;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::Display;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Active,
    Stopping,
}

struct Resources {
    connection: ConnectionManager,
    pool: ConsumerPool,
}

/// Consumes one destination with a pool of consumers sharing a listener.
pub struct QueueConnector {
    config: ConnectorConfig,
    listener: Arc<dyn MessageListener>,
    metrics: ConnectorMetrics,
    resources: Mutex<Resources>,
    state: watch::Sender<LifecycleState>,
    consumers: AtomicUsize,
}

impl QueueConnector {
    pub fn new(
        config: ConnectorConfig,
        naming: Arc<dyn NamingContext>,
        listener: Arc<dyn MessageListener>,
    ) -> Self {
        let connection = ConnectionManager::new(naming, config.connection_factory_name.clone());
        let metrics = ConnectorMetrics::new(config.queue_name.clone());
        let (state, _) = watch::channel(LifecycleState::Stopped);

        Self {
            config,
            listener,
            metrics,
            resources: Mutex::new(Resources {
                connection,
                pool: ConsumerPool::new(),
            }),
            state,
            consumers: AtomicUsize::new(0),
        }
    }

    /// Start consuming.
    ///
    /// Returns `true` when the connector is active, including when it
    /// already was. Returns `false` on any startup failure; partially
    /// acquired resources are released and the state is `Stopped`. Nothing
    /// is retried.
    pub async fn start(&self) -> bool {
        let mut resources = self.resources.lock().await;
        if !resources.pool.is_empty() {
            debug!(queue = %self.config.queue_name, "Connector is already active");
            return true;
        }

        self.state.send_replace(LifecycleState::Starting);
        info!(
            queue = %self.config.queue_name,
            destination = %self.config.destination_uri,
            "Starting queue connector"
        );

        match self.acquire(&mut resources).await {
            Ok(count) => {
                self.consumers.store(count, Ordering::SeqCst);
                self.metrics.active_consumers(count);
                self.state.send_replace(LifecycleState::Active);
                info!(
                    queue = %self.config.queue_name,
                    consumers = count,
                    "Queue connector started"
                );
                true
            }
            Err(e) => {
                self.metrics.start_failed(e.kind());
                error!(
                    queue = %self.config.queue_name,
                    error = %e,
                    kind = e.kind(),
                    "Queue connector failed to start"
                );
                self.release(&mut resources).await;
                self.state.send_replace(LifecycleState::Stopped);
                false
            }
        }
    }

    /// Stop consuming. No-op when already stopped.
    ///
    /// Every cleanup step runs even if an earlier one fails; failures are
    /// logged and counted, never returned.
    pub async fn stop(&self) {
        let mut resources = self.resources.lock().await;
        if resources.pool.is_empty() && !resources.connection.is_connected() {
            debug!(queue = %self.config.queue_name, "Connector is already stopped");
            return;
        }

        self.state.send_replace(LifecycleState::Stopping);
        info!(queue = %self.config.queue_name, "Stopping queue connector");

        let failures = self.release(&mut resources).await;
        self.state.send_replace(LifecycleState::Stopped);

        if failures == 0 {
            info!(queue = %self.config.queue_name, "Queue connector stopped");
        } else {
            warn!(
                queue = %self.config.queue_name,
                failures,
                "Queue connector stopped with errors"
            );
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Consumers currently registered.
    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ConnectorMetrics {
        &self.metrics
    }

    async fn acquire(&self, resources: &mut Resources) -> Result<usize, ConnectorError> {
        let Resources { connection, pool } = resources;

        connection.open_connection().await?;

        let concurrency = self.config.resolve_concurrency();
        pool.create_consumers(connection, &self.config.destination_uri, concurrency)
            .await?;
        pool.attach_dispatcher(Arc::clone(&self.listener)).await?;

        Ok(pool.len())
    }

    /// Detach and close consumers, then sessions and connection. Returns the
    /// number of failed steps.
    async fn release(&self, resources: &mut Resources) -> usize {
        let mut failures = resources.pool.detach_and_close().await;
        failures.extend(resources.connection.close_connection().await);

        for _ in &failures {
            self.metrics.shutdown_failed();
        }
        self.consumers.store(0, Ordering::SeqCst);
        self.metrics.active_consumers(0);
        failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Message;
    use crate::config::QueueDef;
    use crate::memory::{InMemoryBroker, MemoryMessage};
    use async_trait::async_trait;
    use std::future::Future;
    use std::time::Duration;

    struct TestQueue;

    impl QueueDef for TestQueue {
        const QUEUE_NAME: &'static str = "LifecycleQueue";
        const DESTINATION_URI: &'static str = "jms:/queue/LifecycleQueue";
    }

    const PROPERTY: &str = "sdk.eventbus.jms.concurrent.queue.listeners.number.LifecycleQueue";

    #[derive(Default)]
    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageListener for Counting {
        async fn on_message(&self, message: Option<&dyn Message>) {
            if message.is_some() {
                self.seen.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Run `test` on a fresh runtime with the concurrency property set.
    fn with_concurrency(value: &str, test: impl Future<Output = ()>) {
        temp_env::with_var(PROPERTY, Some(value), || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(test)
        });
    }

    fn broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(TestQueue::QUEUE_NAME);
        broker
    }

    fn connector(broker: &InMemoryBroker, listener: Arc<Counting>) -> QueueConnector {
        QueueConnector::new(
            ConnectorConfig::from_queue_def::<TestQueue>(),
            Arc::new(broker.clone()),
            listener,
        )
    }

    #[test]
    fn test_start_twice_is_idempotent() {
        with_concurrency("2", async {
            let broker = broker();
            let connector = connector(&broker, Arc::default());

            assert!(connector.start().await);
            assert!(connector.start().await);

            assert_eq!(connector.state(), LifecycleState::Active);
            assert_eq!(connector.consumer_count(), 2);
            let stats = broker.stats();
            assert_eq!(stats.consumers_created, 2);
            assert_eq!(stats.connections_created, 1);
            assert_eq!(stats.listeners_active, 2);
        });
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let broker = broker();
        let connector = connector(&broker, Arc::default());

        connector.stop().await;
        assert_eq!(connector.state(), LifecycleState::Stopped);

        assert!(connector.start().await);
        connector.stop().await;
        connector.stop().await;

        assert_eq!(connector.state(), LifecycleState::Stopped);
        assert_eq!(connector.consumer_count(), 0);
        let stats = broker.stats();
        assert_eq!(stats.consumers_open, 0);
        assert_eq!(stats.sessions_open, 0);
        assert_eq!(stats.connections_open, 0);
    }

    #[test]
    fn test_configured_concurrency() {
        with_concurrency("4", async {
            let broker = broker();
            let connector = connector(&broker, Arc::default());

            assert!(connector.start().await);
            assert_eq!(connector.consumer_count(), 4);
            assert_eq!(broker.stats().consumers_open, 4);
            connector.stop().await;
        });
    }

    #[test]
    fn test_invalid_concurrency_falls_back_to_one() {
        for value in ["", "many"] {
            with_concurrency(value, async {
                let broker = broker();
                let connector = connector(&broker, Arc::default());

                assert!(connector.start().await);
                assert_eq!(connector.consumer_count(), 1);
            });
        }
    }

    #[tokio::test]
    async fn test_unresolvable_factory_fails_start() {
        let broker = broker();
        broker.fail_factory_lookup(true);
        let connector = connector(&broker, Arc::default());

        assert!(!connector.start().await);
        assert_eq!(connector.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_connection_failure_fails_start() {
        let broker = broker();
        broker.fail_connections(true);
        let connector = connector(&broker, Arc::default());

        assert!(!connector.start().await);
        assert_eq!(connector.state(), LifecycleState::Stopped);

        // The platform may call start again once the broker is back.
        broker.fail_connections(false);
        assert!(connector.start().await);
        assert_eq!(connector.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_missing_destination_fails_start_and_releases_connection() {
        let broker = InMemoryBroker::new();
        let connector = connector(&broker, Arc::default());

        assert!(!connector.start().await);
        let stats = broker.stats();
        assert_eq!(stats.connections_open, 0);
        assert_eq!(stats.consumers_created, 0);
    }

    #[test]
    fn test_partial_pool_is_not_left_attached() {
        with_concurrency("3", async {
            let broker = broker();
            broker.fail_consumer_creation_after(Some(2));
            let connector = connector(&broker, Arc::default());

            assert!(!connector.start().await);

            let stats = broker.stats();
            assert_eq!(stats.listeners_active, 0);
            assert_eq!(stats.consumers_open, 0);
            assert_eq!(stats.sessions_open, 0);
            assert_eq!(stats.connections_open, 0);
            assert_eq!(connector.consumer_count(), 0);
        });
    }

    #[tokio::test]
    async fn test_stop_runs_every_step_despite_failures() {
        let broker = broker();
        let connector = connector(&broker, Arc::default());
        assert!(connector.start().await);

        broker.fail_closes(true);
        connector.stop().await;

        assert_eq!(connector.state(), LifecycleState::Stopped);
        let stats = broker.stats();
        // Listener detached and connection closed even though consumer and
        // session closes were rejected.
        assert_eq!(stats.listeners_active, 0);
        assert_eq!(stats.connections_open, 0);
    }

    #[tokio::test]
    async fn test_no_delivery_after_stop() {
        let broker = broker();
        let listener = Arc::new(Counting::default());
        let connector = connector(&broker, Arc::clone(&listener));
        assert!(connector.start().await);

        broker
            .send(TestQueue::QUEUE_NAME, MemoryMessage::object(b"first".to_vec()))
            .unwrap();
        for _ in 0..200 {
            if listener.seen.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(listener.seen.load(Ordering::SeqCst), 1);

        connector.stop().await;
        broker
            .send(TestQueue::QUEUE_NAME, MemoryMessage::object(b"second".to_vec()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(listener.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_transitions_are_observable() {
        let broker = broker();
        let connector = connector(&broker, Arc::default());
        let mut states = connector.subscribe_state();

        assert!(connector.start().await);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), LifecycleState::Active);

        connector.stop().await;
        assert_eq!(*states.borrow_and_update(), LifecycleState::Stopped);
        assert_eq!(LifecycleState::Active.to_string(), "active");
    }
}
