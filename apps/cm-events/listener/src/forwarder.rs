//! Publishes classified notifications to NATS.

use async_nats::Client;
use async_trait::async_trait;
use core_config::nats::NatsConfig;
use domain_cm_events::{ChangeNotification, CmEventsError, Notification, SubscribedEventsProcessor};
use eyre::{Result, WrapErr};
use tracing::debug;

/// Forwards each notification as JSON to `<subject>.<variant>`.
pub struct NatsEventForwarder {
    client: Client,
    subject: String,
}

impl NatsEventForwarder {
    pub fn new(client: Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }

    /// Open a dedicated publishing connection.
    pub async fn connect(config: &NatsConfig, subject: impl Into<String>) -> Result<Self> {
        let client = async_nats::ConnectOptions::new()
            .name(format!("{}-forwarder", config.connection_name))
            .connect(config.url.as_str())
            .await
            .wrap_err_with(|| format!("Failed to connect to NATS at {}", config.url))?;

        Ok(Self::new(client, subject))
    }

    fn subject_for(&self, notification: &Notification) -> String {
        subject_for(&self.subject, notification)
    }
}

fn subject_for(prefix: &str, notification: &Notification) -> String {
    format!("{}.{}", prefix, notification.variant())
}

#[async_trait]
impl SubscribedEventsProcessor for NatsEventForwarder {
    async fn process_event(&self, notification: Notification) -> Result<(), CmEventsError> {
        let subject = self.subject_for(&notification);
        let payload = serde_json::to_vec(&notification)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| CmEventsError::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            subject = %subject,
            fdn = notification.fdn().unwrap_or_default(),
            "Forwarded subscribed event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_cm_events::NodeNotification;
    use std::collections::BTreeMap;

    #[test]
    fn test_subject_per_variant() {
        let node = Notification::Node(NodeNotification {
            fdn: "NetworkElement=1".to_string(),
            creation_timestamp: chrono::Utc::now(),
            notification_type: None,
            attributes: BTreeMap::new(),
        });

        assert_eq!(
            subject_for("cm.subscribed.events", &node),
            "cm.subscribed.events.node"
        );
    }
}
