//! JetStream consumer slots and received messages.

use super::NatsBrokerConfig;
use crate::broker::{
    AckMode, Destination, EnvelopeKind, Message, MessageConsumer, MessageListener,
    MESSAGE_KIND_HEADER,
};
use crate::delivery::{deliver, DeliveryTask, HandledLedger};
use crate::error::BrokerError;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(1);

/// One consumer slot on the shared durable pull consumer.
///
/// In client mode every message is acknowledged individually
/// (`AckPolicy::Explicit`). A slot keeps the messages it has handled and
/// acknowledges them together with the one its listener acknowledges, so a
/// flush never touches deliveries still in flight on another slot.
pub struct NatsMessageConsumer {
    id: String,
    consumer: Consumer<PullConfig>,
    ack_mode: AckMode,
    handled: Arc<HandledLedger<jetstream::Message>>,
    delivery: Mutex<Option<DeliveryTask>>,
    closed: AtomicBool,
}

impl NatsMessageConsumer {
    /// Bind a slot to the durable consumer of `destination`, creating the
    /// durable on first use.
    pub(crate) async fn create(
        jetstream: &Context,
        config: &NatsBrokerConfig,
        destination: &Destination,
        ack_mode: AckMode,
    ) -> Result<Self, BrokerError> {
        let stream = jetstream
            .get_stream(&destination.name)
            .await
            .map_err(|_| BrokerError::DestinationNotFound(destination.name.clone()))?;

        let ack_policy = match ack_mode {
            AckMode::Client => AckPolicy::Explicit,
            AckMode::Auto => AckPolicy::None,
        };

        let consumer = stream
            .get_or_create_consumer(
                &config.durable_name,
                PullConfig {
                    durable_name: Some(config.durable_name.clone()),
                    name: Some(config.durable_name.clone()),
                    ack_policy,
                    ack_wait: config.ack_wait,
                    max_ack_pending: config.max_ack_pending,
                    ..Default::default()
                },
            )
            .await
            .map_err(BrokerError::consumer_error)?;

        let slot = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}#{}", config.durable_name, slot);
        debug!(
            consumer = %id,
            stream = %destination.name,
            ack_wait_secs = config.ack_wait.as_secs(),
            max_ack_pending = config.max_ack_pending,
            "JetStream consumer bound"
        );

        Ok(Self {
            id,
            consumer,
            ack_mode,
            handled: Arc::new(HandledLedger::new()),
            delivery: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn spawn_delivery(&self, listener: Arc<dyn MessageListener>) -> DeliveryTask {
        let consumer = self.consumer.clone();
        let consumer_id = self.id.clone();
        let handled = match self.ack_mode {
            AckMode::Client => Some(Arc::clone(&self.handled)),
            AckMode::Auto => None,
        };

        DeliveryTask::spawn(move |mut shutdown| async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(consumer = %consumer_id, error = %e, "Failed to open message stream");
                    return;
                }
            };
            info!(consumer = %consumer_id, "Delivery started");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    next = messages.next() => next,
                };

                match next {
                    Some(Ok(message)) => {
                        let message = NatsMessage::new(message).tracked_by(handled.clone());
                        deliver(listener.as_ref(), &message).await;
                        message.into_handled();
                    }
                    Some(Err(e)) => {
                        warn!(consumer = %consumer_id, error = %e, "Error receiving message");
                    }
                    None => break,
                }
            }
            info!(consumer = %consumer_id, "Delivery stopped");
        })
    }
}

#[async_trait]
impl MessageConsumer for NatsMessageConsumer {
    fn consumer_id(&self) -> &str {
        &self.id
    }

    async fn set_message_listener(
        &self,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> Result<(), BrokerError> {
        let mut delivery = self.delivery.lock().await;
        if let Some(task) = delivery.take() {
            task.stop(&self.id).await;
        }

        if let Some(listener) = listener {
            if self.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed("Consumer"));
            }
            *delivery = Some(self.spawn_delivery(listener));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.set_message_listener(None).await?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            let unacknowledged = self.handled.len();
            if unacknowledged > 0 {
                debug!(
                    consumer = %self.id,
                    unacknowledged,
                    "Slot closed with handled messages awaiting acknowledgment"
                );
            }
        }
        Ok(())
    }
}

/// A message received from JetStream.
pub struct NatsMessage {
    message: jetstream::Message,
    id: String,
    kind: EnvelopeKind,
    /// Ledger of the receiving slot, client mode only
    handled: Option<Arc<HandledLedger<jetstream::Message>>>,
    acknowledged: AtomicBool,
}

impl NatsMessage {
    pub fn new(message: jetstream::Message) -> Self {
        let id = match message.info() {
            Ok(info) => format!("{}:{}", info.stream, info.stream_sequence),
            Err(_) => message.subject.to_string(),
        };
        let kind = EnvelopeKind::from_header(
            message
                .headers
                .as_ref()
                .and_then(|headers| headers.get(MESSAGE_KIND_HEADER))
                .map(|value| value.as_str()),
        );

        Self {
            message,
            id,
            kind,
            handled: None,
            acknowledged: AtomicBool::new(false),
        }
    }

    fn tracked_by(mut self, handled: Option<Arc<HandledLedger<jetstream::Message>>>) -> Self {
        self.handled = handled;
        self
    }

    /// Hand the message to its slot's ledger unless it was acknowledged
    /// while being handled.
    fn into_handled(self) {
        if self.acknowledged.load(Ordering::SeqCst) {
            return;
        }
        if let Some(handled) = self.handled {
            handled.record(self.message);
        }
    }
}

#[async_trait]
impl Message for NatsMessage {
    fn message_id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn property_names(&self) -> Vec<String> {
        self.message
            .headers
            .as_ref()
            .map(|headers| headers.iter().map(|(name, _)| name.to_string()).collect())
            .unwrap_or_default()
    }

    async fn acknowledge(&self) -> Result<(), BrokerError> {
        if let Some(handled) = &self.handled {
            let earlier = handled.take();
            let mut failure = None;
            for (index, message) in earlier.iter().enumerate() {
                if let Err(e) = message.ack().await {
                    failure = Some((index, e));
                    break;
                }
            }
            if let Some((index, e)) = failure {
                handled.restore(earlier.into_iter().skip(index).collect());
                return Err(BrokerError::acknowledge_error(e));
            }
        }

        self.message
            .ack()
            .await
            .map_err(BrokerError::acknowledge_error)?;
        self.acknowledged.store(true, Ordering::SeqCst);
        Ok(())
    }
}
