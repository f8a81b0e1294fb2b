use crate::{env_or_default, ConfigError, FromEnv};

/// NATS server connection settings
#[derive(Clone, Debug)]
pub struct NatsConfig {
    pub url: String,
    /// Client name reported to the server (visible in `nats server report connections`)
    pub connection_name: String,
}

impl NatsConfig {
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
        }
    }
}

impl FromEnv for NatsConfig {
    /// NATS_URL defaults to nats://localhost:4222,
    /// NATS_CONNECTION_NAME defaults to cm-events-listener
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_or_default("NATS_URL", "nats://localhost:4222"),
            connection_name: env_or_default("NATS_CONNECTION_NAME", "cm-events-listener"),
        })
    }
}
