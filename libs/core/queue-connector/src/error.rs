//! Connector error types
//!
//! Two layers:
//! - [`BrokerError`]: what a broker binding (NATS, in-memory) reports
//! - [`ConnectorError`]: the lifecycle-level taxonomy the connector and its
//!   listeners surface (configuration, connection, consumer creation,
//!   shutdown, per-message processing, acknowledgment)

use thiserror::Error;

/// Failure reported by a broker binding.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// NATS connection error
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// JetStream API error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Broker refused or is not reachable
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A naming lookup found nothing under the given name
    #[error("Name not found: {0}")]
    NameNotFound(String),

    /// Destination (queue/stream) does not exist
    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    /// Destination URI cannot be parsed
    #[error("Invalid destination URI: {0}")]
    InvalidDestination(String),

    /// Session-level failure
    #[error("Session error: {0}")]
    Session(String),

    /// Consumer-level failure
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgment could not be delivered to the broker
    #[error("Acknowledgment error: {0}")]
    Acknowledge(String),

    /// Operation on a resource that has already been closed
    #[error("{0} is closed")]
    Closed(&'static str),
}

impl BrokerError {
    /// Create a JetStream error from any async_nats error.
    pub fn from_jetstream_error(error: impl std::fmt::Display) -> Self {
        Self::JetStream(error.to_string())
    }

    /// Create a consumer error.
    pub fn consumer_error(error: impl std::fmt::Display) -> Self {
        Self::Consumer(error.to_string())
    }

    /// Create an acknowledgment error.
    pub fn acknowledge_error(error: impl std::fmt::Display) -> Self {
        Self::Acknowledge(error.to_string())
    }
}

/// Connector error taxonomy.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Connection factory (or other configured resource) cannot be resolved
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BrokerError>,
    },

    /// Broker connection cannot be opened or started
    #[error("Connection error: {0}")]
    Connection(#[source] BrokerError),

    /// Destination lookup or session/consumer creation failed
    #[error("Consumer creation error: {0}")]
    ConsumerCreation(#[source] BrokerError),

    /// Failure while closing consumers, sessions or the connection
    #[error("Shutdown error: {0}")]
    Shutdown(#[source] BrokerError),

    /// Failure classifying or handling one message
    #[error("Message processing error for {message_id}: {reason}")]
    MessageProcessing { message_id: String, reason: String },

    /// Batch acknowledgment could not be flushed
    #[error("Acknowledgment error: {0}")]
    Acknowledgment(#[source] BrokerError),
}

impl ConnectorError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>, source: Option<BrokerError>) -> Self {
        Self::Configuration {
            message: message.into(),
            source,
        }
    }

    /// Create a message processing error.
    pub fn processing(message_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::MessageProcessing {
            message_id: message_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Connection(_) => "connection",
            Self::ConsumerCreation(_) => "consumer_creation",
            Self::Shutdown(_) => "shutdown",
            Self::MessageProcessing { .. } => "message_processing",
            Self::Acknowledgment(_) => "acknowledgment",
        }
    }
}
