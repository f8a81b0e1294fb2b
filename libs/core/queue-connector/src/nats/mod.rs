//! NATS JetStream broker binding.
//!
//! | Broker object | JetStream |
//! |---------------|-----------|
//! | connection factory | server URL + client name |
//! | connection | `async_nats::Client` + JetStream context |
//! | destination | stream (named after the queue) |
//! | session | JetStream context bound to an ack mode |
//! | consumer | slot on a durable pull consumer shared by all slots |
//!
//! Client acknowledgment maps to `AckPolicy::Explicit`. Acknowledging a
//! message also acknowledges the messages its slot handled before it, and
//! nothing delivered to other slots.
//!
//! Flushes are count driven, so a handled message waits for its slot's next
//! flush. If that takes longer than [`NatsBrokerConfig::ack_wait`] the server
//! redelivers it. Size `ack_wait` to the slowest expected traffic.

mod config;
mod consumer;

pub use config::NatsBrokerConfig;
pub use consumer::{NatsMessage, NatsMessageConsumer};

use crate::broker::{
    AckMode, Connection, ConnectionFactory, Destination, MessageConsumer, NamingContext, Session,
};
use crate::error::BrokerError;
use async_nats::jetstream::Context;
use async_nats::Client;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves the configured connection factory name to a NATS factory.
pub struct NatsNamingContext {
    config: Arc<NatsBrokerConfig>,
}

impl NatsNamingContext {
    pub fn new(config: NatsBrokerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl NamingContext for NatsNamingContext {
    fn lookup_connection_factory(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ConnectionFactory>, BrokerError> {
        if name != self.config.connection_factory_name {
            return Err(BrokerError::NameNotFound(name.to_string()));
        }
        Ok(Arc::new(NatsConnectionFactory {
            config: Arc::clone(&self.config),
        }))
    }
}

/// Opens NATS client connections.
pub struct NatsConnectionFactory {
    config: Arc<NatsBrokerConfig>,
}

#[async_trait]
impl ConnectionFactory for NatsConnectionFactory {
    async fn create_connection(&self) -> Result<Box<dyn Connection>, BrokerError> {
        info!(
            url = %self.config.url,
            name = %self.config.connection_name,
            "Connecting to NATS"
        );

        let client = async_nats::ConnectOptions::new()
            .name(&self.config.connection_name)
            .connect(self.config.url.as_str())
            .await?;
        let jetstream = async_nats::jetstream::new(client.clone());

        Ok(Box::new(NatsConnection {
            client,
            jetstream,
            config: Arc::clone(&self.config),
            closed: AtomicBool::new(false),
        }))
    }
}

struct NatsConnection {
    client: Client,
    jetstream: Context,
    config: Arc<NatsBrokerConfig>,
    closed: AtomicBool,
}

impl NatsConnection {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed("Connection"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for NatsConnection {
    async fn start(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    async fn lookup_destination(&self, uri: &str) -> Result<Destination, BrokerError> {
        self.ensure_open()?;
        let destination = Destination::parse(uri)?;

        let mut stream = self
            .jetstream
            .get_stream(&destination.name)
            .await
            .map_err(|_| BrokerError::DestinationNotFound(destination.name.clone()))?;
        let info = stream
            .info()
            .await
            .map_err(BrokerError::from_jetstream_error)?;
        debug!(
            stream = %destination.name,
            messages = info.state.messages,
            "Destination resolved"
        );

        Ok(destination)
    }

    async fn create_session(&self, ack_mode: AckMode) -> Result<Box<dyn Session>, BrokerError> {
        self.ensure_open()?;
        Ok(Box::new(NatsSession {
            jetstream: self.jetstream.clone(),
            config: Arc::clone(&self.config),
            ack_mode,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Pending acknowledgments are flushed; the socket closes once every
        // clone of the client is dropped.
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }
}

struct NatsSession {
    jetstream: Context,
    config: Arc<NatsBrokerConfig>,
    ack_mode: AckMode,
    closed: AtomicBool,
}

#[async_trait]
impl Session for NatsSession {
    fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed("Session"));
        }
        let consumer =
            NatsMessageConsumer::create(&self.jetstream, &self.config, destination, self.ack_mode)
                .await?;
        Ok(Box::new(consumer))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
