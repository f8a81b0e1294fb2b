//! Dispatcher for the CM data-change diverted queue.
//!
//! Per non-empty message, always and in this order:
//! 1. count it toward the next acknowledgment
//! 2. classify and forward it (failures and panics contained here)
//! 3. flush the acknowledgment if the threshold is reached

use crate::error::CmEventsError;
use crate::notification::{
    ChangeNotification, ComEcimNodeNotification, DpsDataChangedEvent, NodeNotification,
    Notification, Payload,
};
use crate::processor::SubscribedEventsProcessor;
use crate::queue::CmDataChangeDivertedQueue;
use async_trait::async_trait;
use futures::FutureExt;
use queue_connector::{
    AckBatcher, ConnectorError, ConnectorMetrics, EnvelopeKind, Message, MessageListener, QueueDef,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Listener registered on every consumer of the diverted queue.
pub struct CmDataChangeListener {
    processor: Arc<dyn SubscribedEventsProcessor>,
    batcher: Arc<AckBatcher>,
    metrics: ConnectorMetrics,
    total_received: AtomicU64,
}

impl CmDataChangeListener {
    pub fn new(processor: Arc<dyn SubscribedEventsProcessor>, batcher: Arc<AckBatcher>) -> Self {
        Self {
            processor,
            batcher,
            metrics: ConnectorMetrics::new(CmDataChangeDivertedQueue::QUEUE_NAME),
            total_received: AtomicU64::new(0),
        }
    }

    /// Object messages extracted so far.
    pub fn total_received(&self) -> u64 {
        self.total_received.load(Ordering::Relaxed)
    }

    pub fn batcher(&self) -> &Arc<AckBatcher> {
        &self.batcher
    }

    /// Classify and forward one message. Never fails or panics outward.
    async fn process_object(&self, message: &dyn Message) {
        let outcome = AssertUnwindSafe(self.classify_and_route(message))
            .catch_unwind()
            .await;

        let reason = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_reason(&*panic),
        };

        self.metrics.message_failed();
        let err = ConnectorError::processing(message.message_id(), reason);
        error!(error = %err, message = ?message, "Failed to process CM data change event");
    }

    async fn classify_and_route(&self, message: &dyn Message) -> Result<(), CmEventsError> {
        let Some(payload) = self.extract_object(message) else {
            error!(message_id = %message.message_id(), "Message object is empty");
            self.metrics.message_dropped("empty_object");
            return Ok(());
        };

        match payload.into_notification() {
            Some(Notification::Node(n)) => self.process_node_notification(n).await,
            Some(Notification::ComEcim(n)) => self.process_com_ecim_notification(n).await,
            Some(Notification::DataChange(e)) => self.process_data_change_event(e).await,
            None => {
                info!(
                    message = ?message,
                    properties = ?message.property_names(),
                    "Unexpected event"
                );
                self.metrics.message_dropped("unrecognized");
                Ok(())
            }
        }
    }

    /// Decode the payload of an object message. Anything else, or a payload
    /// that does not decode, yields `None`.
    fn extract_object(&self, message: &dyn Message) -> Option<Payload> {
        if message.kind() != EnvelopeKind::Object {
            debug!(
                message_id = %message.message_id(),
                error = %CmEventsError::UnsupportedEnvelope(message.kind().as_str()),
                "Not an object message"
            );
            return None;
        }

        match Payload::from_slice(message.payload()) {
            Ok(payload) => {
                let total = self.total_received.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(message_id = %message.message_id(), total, "Object message extracted");
                Some(payload)
            }
            Err(e) => {
                error!(
                    message = ?message,
                    error = %CmEventsError::from(e),
                    "Failed to extract message object"
                );
                None
            }
        }
    }

    async fn process_node_notification(
        &self,
        notification: NodeNotification,
    ) -> Result<(), CmEventsError> {
        debug!(
            fdn = notification.fdn().unwrap_or_default(),
            timestamp = %notification.timestamp().unwrap_or_default(),
            "CPP node notification received"
        );
        self.forward(Notification::Node(notification)).await
    }

    async fn process_com_ecim_notification(
        &self,
        notification: ComEcimNodeNotification,
    ) -> Result<(), CmEventsError> {
        debug!(
            fdn = notification.fdn().unwrap_or_default(),
            timestamp = %notification.timestamp().unwrap_or_default(),
            "COM/ECIM node notification received"
        );
        self.forward(Notification::ComEcim(notification)).await
    }

    async fn process_data_change_event(
        &self,
        event: DpsDataChangedEvent,
    ) -> Result<(), CmEventsError> {
        debug!(
            fdn = event.fdn().unwrap_or_default(),
            changed = event.changed_attributes.len(),
            "DPS data change event received"
        );
        self.forward(Notification::DataChange(event)).await
    }

    async fn forward(&self, notification: Notification) -> Result<(), CmEventsError> {
        let variant = notification.variant();
        self.processor.process_event(notification).await?;
        self.metrics.message_handled(variant);
        Ok(())
    }
}

#[async_trait]
impl MessageListener for CmDataChangeListener {
    async fn on_message(&self, message: Option<&dyn Message>) {
        let Some(message) = message else {
            error!("Received empty CM data change event");
            self.metrics.message_dropped("empty_message");
            return;
        };

        self.batcher.record_receipt();
        self.metrics.message_received();
        self.process_object(message).await;
        self.batcher.flush_if_due(message).await;
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        format!("panic: {reason}")
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        format!("panic: {reason}")
    } else {
        "panic".to_string()
    }
}
