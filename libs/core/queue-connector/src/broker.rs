//! Broker object model.
//!
//! The connector talks to a broker only through these traits:
//!
//! ```text
//! NamingContext ──lookup──▶ ConnectionFactory ──create──▶ Connection
//!                                                           │
//!                                      create_session(AckMode)
//!                                                           ▼
//!                     MessageListener ◀──push── MessageConsumer ◀── Session
//! ```
//!
//! Bindings live in [`crate::nats`] (JetStream) and [`crate::memory`]
//! (in-process).

use crate::error::BrokerError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Header carrying the envelope kind of a message.
pub const MESSAGE_KIND_HEADER: &str = "Message-Kind";

/// Who decides when received messages are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker acknowledges on delivery.
    Auto,
    /// The client acknowledges explicitly; one acknowledgment covers every
    /// message the same consumer handled before it.
    Client,
}

/// Envelope kind of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Serialized object payload
    Object,
    /// Plain text payload
    Text,
    /// Opaque bytes
    Bytes,
}

impl EnvelopeKind {
    /// Parse the value of the [`MESSAGE_KIND_HEADER`] header. An absent
    /// header means an object message.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None => Self::Object,
            Some(v) if v.eq_ignore_ascii_case("object") => Self::Object,
            Some(v) if v.eq_ignore_ascii_case("text") => Self::Text,
            Some(_) => Self::Bytes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Text => "text",
            Self::Bytes => "bytes",
        }
    }
}

/// A resolved queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// URI the destination was looked up by
    pub uri: String,
    /// Queue name on the broker
    pub name: String,
}

impl Destination {
    /// Parse `queue/<name>` or `<scheme>:/queue/<name>`.
    pub fn parse(uri: &str) -> Result<Self, BrokerError> {
        let path = match uri.split_once(":/") {
            Some((_scheme, path)) => path,
            None => uri,
        };

        match path.trim_start_matches('/').split_once('/') {
            Some(("queue", name)) if !name.is_empty() && !name.contains('/') => Ok(Self {
                uri: uri.to_string(),
                name: name.to_string(),
            }),
            _ => Err(BrokerError::InvalidDestination(uri.to_string())),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Directory of broker resources, consulted by name.
pub trait NamingContext: Send + Sync {
    fn lookup_connection_factory(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ConnectionFactory>, BrokerError>;
}

/// Creates broker connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> Result<Box<dyn Connection>, BrokerError>;
}

/// One live session to the broker.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Start delivery on this connection.
    async fn start(&self) -> Result<(), BrokerError>;

    /// Resolve a destination URI.
    async fn lookup_destination(&self, uri: &str) -> Result<Destination, BrokerError>;

    async fn create_session(&self, ack_mode: AckMode) -> Result<Box<dyn Session>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Child of a connection; owns consumers.
#[async_trait]
pub trait Session: Send + Sync {
    fn ack_mode(&self) -> AckMode;

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Receives from one destination and pushes to a registered listener.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    fn consumer_id(&self) -> &str;

    /// Register (`Some`) or unregister (`None`) the receive callback.
    ///
    /// Unregistering returns once the message currently being handled, if
    /// any, has completed; nothing is dispatched afterwards.
    async fn set_message_listener(
        &self,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// A received message.
#[async_trait]
pub trait Message: Send + Sync {
    /// Broker-assigned identifier, for logging.
    fn message_id(&self) -> String;

    fn kind(&self) -> EnvelopeKind;

    fn payload(&self) -> &[u8];

    /// Names of the message properties (headers).
    fn property_names(&self) -> Vec<String>;

    /// Acknowledge this message and every earlier one its consumer has
    /// handled (client acknowledgment mode). Messages delivered to other
    /// consumers are not covered.
    async fn acknowledge(&self) -> Result<(), BrokerError>;
}

impl fmt::Debug for dyn Message + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.message_id())
            .field("kind", &self.kind())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// Receive callback registered on consumers.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Handle one delivery. `None` stands for an absent (empty) message.
    async fn on_message(&self, message: Option<&dyn Message>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_parse() {
        let dest = Destination::parse("jms:/queue/CmDataChangeDivertedQueue").unwrap();
        assert_eq!(dest.name, "CmDataChangeDivertedQueue");
        assert_eq!(dest.uri, "jms:/queue/CmDataChangeDivertedQueue");

        let dest = Destination::parse("queue/Orders").unwrap();
        assert_eq!(dest.name, "Orders");

        assert!(Destination::parse("topic/Orders").is_err());
        assert!(Destination::parse("queue/").is_err());
        assert!(Destination::parse("nats:/queue/a/b").is_err());
    }

    #[test]
    fn test_envelope_kind_from_header() {
        assert_eq!(EnvelopeKind::from_header(None), EnvelopeKind::Object);
        assert_eq!(EnvelopeKind::from_header(Some("Object")), EnvelopeKind::Object);
        assert_eq!(EnvelopeKind::from_header(Some("text")), EnvelopeKind::Text);
        assert_eq!(EnvelopeKind::from_header(Some("map")), EnvelopeKind::Bytes);
    }
}
