//! Downstream boundary of the listener.

use crate::error::CmEventsError;
use crate::notification::{ChangeNotification, Notification};
use async_trait::async_trait;
use tracing::info;

/// Receives every classified notification, once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscribedEventsProcessor: Send + Sync {
    async fn process_event(&self, notification: Notification) -> Result<(), CmEventsError>;
}

/// Processor that only logs what it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventsProcessor;

#[async_trait]
impl SubscribedEventsProcessor for LoggingEventsProcessor {
    async fn process_event(&self, notification: Notification) -> Result<(), CmEventsError> {
        info!(
            variant = notification.variant(),
            fdn = notification.fdn().unwrap_or_default(),
            timestamp = %notification.timestamp().unwrap_or_default(),
            "Subscribed event received"
        );
        Ok(())
    }
}
