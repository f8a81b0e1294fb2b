//! Configuration of the JetStream binding.

use crate::config::DEFAULT_CONNECTION_FACTORY_NAME;
use core_config::nats::NatsConfig;
use std::time::Duration;
use tracing::{info, warn};

/// JetStream binding settings.
#[derive(Debug, Clone)]
pub struct NatsBrokerConfig {
    /// NATS server URL
    pub url: String,

    /// Client name reported to the server
    pub connection_name: String,

    /// Name the connection factory is resolvable under
    pub connection_factory_name: String,

    /// Durable pull consumer shared by every consumer slot
    pub durable_name: String,

    /// How long a delivered message may stay unacknowledged before
    /// redelivery.
    ///
    /// Acknowledgments are only sent once the threshold count of messages
    /// has been received, so this must outlast the time the queue needs to
    /// receive that many. Below `threshold / ack_wait` messages per second,
    /// handled messages are redelivered and processed again.
    pub ack_wait: Duration,

    /// Unacknowledged messages the server lets the durable hold. Must exceed
    /// the acknowledgment threshold or delivery stalls before a flush.
    pub max_ack_pending: i64,
}

impl NatsBrokerConfig {
    pub fn new(url: impl Into<String>, durable_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: "queue-connector".to_string(),
            connection_factory_name: DEFAULT_CONNECTION_FACTORY_NAME.to_string(),
            durable_name: durable_name.into(),
            ack_wait: Duration::from_secs(60 * 60),
            max_ack_pending: 20_000,
        }
    }

    /// Build from server settings. The client name doubles as durable name.
    pub fn from_nats_config(nats: &NatsConfig) -> Self {
        Self::new(nats.url.clone(), nats.connection_name.clone())
            .with_connection_name(nats.connection_name.clone())
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    pub fn with_connection_factory_name(mut self, name: impl Into<String>) -> Self {
        self.connection_factory_name = name.into();
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_ack_pending(mut self, max_ack_pending: i64) -> Self {
        self.max_ack_pending = max_ack_pending;
        self
    }

    /// Lowest steady rate, in messages per second, at which batches of
    /// `ack_threshold` are acknowledged before `ack_wait` expires.
    pub fn min_rate_without_redelivery(&self, ack_threshold: u64) -> f64 {
        ack_threshold as f64 / self.ack_wait.as_secs_f64().max(f64::MIN_POSITIVE)
    }

    /// Warn about settings that redeliver handled messages or stall delivery
    /// for the given acknowledgment threshold. Returns whether any was found.
    pub fn warn_on_batching_risks(&self, ack_threshold: u64) -> bool {
        let mut risky = false;
        if self.max_ack_pending >= 0 && (self.max_ack_pending as u64) < ack_threshold {
            warn!(
                max_ack_pending = self.max_ack_pending,
                ack_threshold,
                "max_ack_pending is below the acknowledgment threshold, delivery stalls before a flush"
            );
            risky = true;
        }

        let min_rate = self.min_rate_without_redelivery(ack_threshold);
        if min_rate > 1.0 {
            warn!(
                ack_wait_secs = self.ack_wait.as_secs(),
                ack_threshold,
                min_rate_per_sec = min_rate,
                "Traffic below this rate redelivers handled messages before they are acknowledged"
            );
            risky = true;
        } else {
            info!(
                ack_wait_secs = self.ack_wait.as_secs(),
                ack_threshold,
                min_rate_per_sec = min_rate,
                "Handled messages are redelivered if traffic stays below this rate"
            );
        }
        risky
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_nats_config() {
        let nats = NatsConfig::new("nats://broker:4222", "cm-events-listener");
        let config = NatsBrokerConfig::from_nats_config(&nats);

        assert_eq!(config.url, "nats://broker:4222");
        assert_eq!(config.connection_name, "cm-events-listener");
        assert_eq!(config.durable_name, "cm-events-listener");
        assert_eq!(config.connection_factory_name, "java:/ConnectionFactory");
        assert_eq!(config.ack_wait, Duration::from_secs(3600));
        assert_eq!(config.max_ack_pending, 20_000);
    }

    #[test]
    fn test_batching_risks() {
        let defaults = NatsBrokerConfig::new("nats://broker:4222", "durable");
        // 2000 per hour
        let rate = defaults.min_rate_without_redelivery(2000);
        assert!((rate - 2000.0 / 3600.0).abs() < 1e-9);
        assert!(!defaults.warn_on_batching_risks(2000));

        let short_wait = defaults.clone().with_ack_wait(Duration::from_secs(30));
        assert!(short_wait.warn_on_batching_risks(2000));

        let small_window = defaults.with_max_ack_pending(100);
        assert!(small_window.warn_on_batching_risks(2000));
    }
}
