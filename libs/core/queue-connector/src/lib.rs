//! Durable queue connector.
//!
//! Consumes one broker destination with a configurable pool of consumers,
//! hands every message to a shared [`MessageListener`], and acknowledges in
//! batches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      QueueConnector                          │
//! │  start(): open connection → create consumers → attach        │
//! │  stop():  detach → close consumers → sessions → connection   │
//! │                                                              │
//! │  ┌──────────────────┐   ┌────────────────────────────────┐   │
//! │  │ ConnectionManager│──▶│ ConsumerPool (N × session +    │   │
//! │  │ factory (cached) │   │ consumer, client ack)          │   │
//! │  │ connection       │   └───────────────┬────────────────┘   │
//! │  │ sessions         │                   │ on_message         │
//! │  └──────────────────┘                   ▼                    │
//! │                              MessageListener (shared)        │
//! │                                         │                    │
//! │                                   AckBatcher (atomic count,  │
//! │                                   flush every N messages)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use queue_connector::{ConnectorConfig, QueueConnector, QueueDef};
//! use queue_connector::nats::{NatsBrokerConfig, NatsNamingContext};
//!
//! struct Orders;
//!
//! impl QueueDef for Orders {
//!     const QUEUE_NAME: &'static str = "Orders";
//!     const DESTINATION_URI: &'static str = "jms:/queue/Orders";
//! }
//!
//! let naming = NatsNamingContext::new(NatsBrokerConfig::new("nats://localhost:4222", "orders"));
//! let connector = QueueConnector::new(
//!     ConnectorConfig::from_queue_def::<Orders>(),
//!     Arc::new(naming),
//!     Arc::new(my_listener),
//! );
//!
//! if !connector.start().await {
//!     // startup failed, resources already released
//! }
//! // ...
//! connector.stop().await;
//! ```

pub mod ack;
pub mod broker;
pub mod config;
pub mod connection;
pub mod connector;
mod delivery;
pub mod error;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod nats;
pub mod pool;

pub use ack::{AckBatcher, FlushOutcome, DEFAULT_ACK_THRESHOLD};
pub use broker::{
    AckMode, Connection, ConnectionFactory, Destination, EnvelopeKind, Message, MessageConsumer,
    MessageListener, NamingContext, Session, MESSAGE_KIND_HEADER,
};
pub use config::{ConnectorConfig, QueueDef, DEFAULT_CONNECTION_FACTORY_NAME};
pub use connection::ConnectionManager;
pub use connector::{LifecycleState, QueueConnector};
pub use error::{BrokerError, ConnectorError};
pub use health::{health_router, HealthState};
pub use memory::{BrokerStats, InMemoryBroker, MemoryMessage};
pub use metrics::{init_metrics, ConnectorMetrics};
pub use pool::ConsumerPool;
