//! Connector configuration
//!
//! `QueueDef` carries the type-level constants of one queue binding;
//! `ConnectorConfig` is the runtime value built from it.

use std::env;
use tracing::{debug, info, warn};

/// Type-level definition of a consumed queue.
///
/// # Example
///
/// ```rust,ignore
/// struct OrdersQueue;
///
/// impl QueueDef for OrdersQueue {
///     const QUEUE_NAME: &'static str = "Orders";
///     const DESTINATION_URI: &'static str = "jms:/queue/Orders";
/// }
/// ```
pub trait QueueDef {
    /// Queue name on the broker, also used in the concurrency property key
    const QUEUE_NAME: &'static str;

    /// URI the destination is looked up by
    const DESTINATION_URI: &'static str;

    /// Logical name of the connection factory in the naming context
    const CONNECTION_FACTORY_NAME: &'static str = DEFAULT_CONNECTION_FACTORY_NAME;

    /// Consumers created when no concurrency is configured
    const DEFAULT_CONCURRENCY: usize = 1;

    /// Received messages per acknowledgment flush
    const ACK_THRESHOLD: u64 = 2000;
}

/// Default logical name of the connection factory.
pub const DEFAULT_CONNECTION_FACTORY_NAME: &str = "java:/ConnectionFactory";

/// Default namespace of the concurrency property.
pub const DEFAULT_PROPERTY_NAMESPACE: &str = "sdk.eventbus.jms";

/// Runtime configuration of a queue connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Logical name of the connection factory
    pub connection_factory_name: String,

    /// URI of the consumed destination
    pub destination_uri: String,

    /// Queue name (key suffix for the concurrency property)
    pub queue_name: String,

    /// Prefix of the concurrency property key
    pub property_namespace: String,

    /// Consumers created when the property is absent or invalid
    pub default_concurrency: usize,

    /// Received messages per acknowledgment flush
    pub ack_threshold: u64,
}

impl ConnectorConfig {
    /// Create a config with explicit destination and defaults for the rest.
    pub fn new(queue_name: impl Into<String>, destination_uri: impl Into<String>) -> Self {
        Self {
            connection_factory_name: DEFAULT_CONNECTION_FACTORY_NAME.to_string(),
            destination_uri: destination_uri.into(),
            queue_name: queue_name.into(),
            property_namespace: DEFAULT_PROPERTY_NAMESPACE.to_string(),
            default_concurrency: 1,
            ack_threshold: 2000,
        }
    }

    /// Create a config from a queue definition.
    pub fn from_queue_def<Q: QueueDef>() -> Self {
        Self {
            connection_factory_name: Q::CONNECTION_FACTORY_NAME.to_string(),
            destination_uri: Q::DESTINATION_URI.to_string(),
            queue_name: Q::QUEUE_NAME.to_string(),
            property_namespace: DEFAULT_PROPERTY_NAMESPACE.to_string(),
            default_concurrency: Q::DEFAULT_CONCURRENCY.max(1),
            ack_threshold: Q::ACK_THRESHOLD.max(1),
        }
    }

    /// Set the connection factory name
    pub fn with_connection_factory_name(mut self, name: impl Into<String>) -> Self {
        self.connection_factory_name = name.into();
        self
    }

    /// Set the destination URI
    pub fn with_destination_uri(mut self, uri: impl Into<String>) -> Self {
        self.destination_uri = uri.into();
        self
    }

    /// Set the concurrency property namespace
    pub fn with_property_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.property_namespace = namespace.into();
        self
    }

    /// Set the default concurrency (minimum 1)
    pub fn with_default_concurrency(mut self, count: usize) -> Self {
        self.default_concurrency = count.max(1);
        self
    }

    /// Set the acknowledgment threshold (minimum 1)
    pub fn with_ack_threshold(mut self, threshold: u64) -> Self {
        self.ack_threshold = threshold.max(1);
        self
    }

    /// Key of the concurrency property:
    /// `<namespace>.concurrent.queue.listeners.number.<queue-name>`
    pub fn concurrency_property(&self) -> String {
        format!(
            "{}.concurrent.queue.listeners.number.{}",
            self.property_namespace, self.queue_name
        )
    }

    /// Number of consumers to create, read from the environment.
    ///
    /// Never fails: an absent, empty, non-numeric or non-positive value
    /// falls back to `default_concurrency`.
    pub fn resolve_concurrency(&self) -> usize {
        let property = self.concurrency_property();
        let default = self.default_concurrency.max(1);

        let raw = match env::var(&property) {
            Ok(raw) => raw,
            Err(_) => {
                info!(
                    property = %property,
                    default,
                    "Concurrency property not set, using default"
                );
                return default;
            }
        };

        let raw = raw.trim();
        if raw.is_empty() {
            info!(
                property = %property,
                default,
                "Concurrency property is empty, using default"
            );
            return default;
        }

        match raw.parse::<usize>() {
            Ok(count) if count >= 1 => {
                debug!(property = %property, count, "Concurrency property found");
                count
            }
            Ok(_) => {
                warn!(
                    property = %property,
                    value = %raw,
                    default,
                    "Concurrency property must be at least 1, using default"
                );
                default
            }
            Err(e) => {
                warn!(
                    property = %property,
                    value = %raw,
                    error = %e,
                    default,
                    "Concurrency property is not a number, using default"
                );
                default
            }
        }
    }
}
