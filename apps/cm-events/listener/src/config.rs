//! Listener configuration.

use core_config::nats::NatsConfig;
use core_config::server::HealthServerConfig;
use core_config::{env_or_default, ConfigError, FromEnv};
use strum::{Display, EnumString};

const DEFAULT_FORWARD_SUBJECT: &str = "cm.subscribed.events";

/// Broker the listener consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BrokerKind {
    /// NATS JetStream
    Nats,
    /// In-process broker, no infrastructure required
    Memory,
}

/// Settings of the listener process.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub broker: BrokerKind,
    /// Subject prefix classified notifications are published under
    pub forward_subject: String,
    pub nats: NatsConfig,
    pub health: HealthServerConfig,
}

impl FromEnv for ListenerConfig {
    /// Reads BROKER (nats | memory, default nats), CM_EVENTS_FORWARD_SUBJECT,
    /// plus the NATS and health server settings.
    fn from_env() -> Result<Self, ConfigError> {
        let raw_broker = env_or_default("BROKER", "nats");
        let broker = raw_broker
            .trim()
            .parse::<BrokerKind>()
            .map_err(|e| ConfigError::ParseError {
                key: "BROKER".to_string(),
                details: format!("{e}: '{raw_broker}'"),
            })?;

        Ok(Self {
            broker,
            forward_subject: env_or_default("CM_EVENTS_FORWARD_SUBJECT", DEFAULT_FORWARD_SUBJECT),
            nats: NatsConfig::from_env()?,
            health: HealthServerConfig::from_env()?,
        })
    }
}
