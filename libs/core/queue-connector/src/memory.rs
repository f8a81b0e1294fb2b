//! In-process broker.
//!
//! Implements the full broker object model on top of tokio channels:
//! competing consumers on named queues, auto/client acknowledgment scoped to
//! the consumer that received the message, resource accounting and fault
//! injection. Used by tests and for running a listener
//! without infrastructure.
//!
//! ```rust,ignore
//! let broker = InMemoryBroker::new();
//! broker.declare_queue("Orders");
//! broker.send("Orders", MemoryMessage::object(br#"{"id":1}"#.to_vec()))?;
//!
//! let connector = QueueConnector::new(config, Arc::new(broker.clone()), listener);
//! connector.start().await;
//! ```

use crate::broker::{
    AckMode, Connection, ConnectionFactory, Destination, EnvelopeKind, Message, MessageConsumer,
    MessageListener, NamingContext, Session,
};
use crate::config::DEFAULT_CONNECTION_FACTORY_NAME;
use crate::delivery::{deliver, lock, DeliveryTask, HandledLedger};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const NEVER: usize = usize::MAX;

/// A message as sent to, and delivered from, the in-memory broker.
#[derive(Clone)]
pub struct MemoryMessage {
    kind: EnvelopeKind,
    properties: BTreeMap<String, String>,
    payload: Vec<u8>,
    sequence: u64,
    receipt: Option<Receipt>,
}

#[derive(Clone)]
struct Receipt {
    queue: Arc<MemoryQueue>,
    broker: Arc<BrokerInner>,
    /// Set on delivery to a client-acknowledged consumer
    handled: Option<Arc<HandledLedger<u64>>>,
}

impl MemoryMessage {
    /// Object message carrying a serialized payload.
    pub fn object(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_kind(EnvelopeKind::Object, payload)
    }

    /// Text message.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::with_kind(EnvelopeKind::Text, payload.into().into_bytes())
    }

    /// Message without payload (delivered to listeners as absent).
    pub fn empty() -> Self {
        Self::with_kind(EnvelopeKind::Object, Vec::new())
    }

    pub fn with_kind(kind: EnvelopeKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
            payload: payload.into(),
            sequence: 0,
            receipt: None,
        }
    }

    /// Attach a property (header).
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Sequence assigned by the queue (0 when never sent).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[async_trait]
impl Message for MemoryMessage {
    fn message_id(&self) -> String {
        match &self.receipt {
            Some(receipt) => format!("{}:{}", receipt.queue.name, self.sequence),
            None => format!("detached:{}", self.sequence),
        }
    }

    fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    async fn acknowledge(&self) -> Result<(), BrokerError> {
        let Some(receipt) = &self.receipt else {
            return Ok(());
        };

        if receipt.broker.faults.fail_acknowledge.load(Ordering::SeqCst) {
            return Err(BrokerError::Acknowledge(format!(
                "acknowledgment of {} rejected",
                self.message_id()
            )));
        }

        let mut covered = receipt
            .handled
            .as_ref()
            .map(|handled| handled.take())
            .unwrap_or_default();
        covered.push(self.sequence);
        receipt.queue.acknowledge(&covered);
        receipt
            .broker
            .stats
            .acknowledgements
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryQueue {
    name: String,
    sender: mpsc::UnboundedSender<MemoryMessage>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryMessage>>,
    next_sequence: AtomicU64,
    delivered: AtomicU64,
    /// Acknowledged sequences above `acknowledged_through`
    acknowledged: Mutex<BTreeSet<u64>>,
    acknowledged_through: AtomicU64,
}

impl MemoryQueue {
    fn new(name: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            next_sequence: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            acknowledged: Mutex::new(BTreeSet::new()),
            acknowledged_through: AtomicU64::new(0),
        }
    }

    async fn next_message(&self) -> Option<MemoryMessage> {
        self.receiver.lock().await.recv().await
    }

    fn acknowledge(&self, sequences: &[u64]) {
        let mut acknowledged = lock(&self.acknowledged);
        acknowledged.extend(sequences.iter().copied());

        let mut through = self.acknowledged_through.load(Ordering::SeqCst);
        while acknowledged.contains(&(through + 1)) {
            through += 1;
        }
        *acknowledged = acknowledged.split_off(&(through + 1));
        self.acknowledged_through.store(through, Ordering::SeqCst);
    }

    fn is_acknowledged(&self, sequence: u64) -> bool {
        let acknowledged = lock(&self.acknowledged);
        sequence <= self.acknowledged_through.load(Ordering::SeqCst)
            || acknowledged.contains(&sequence)
    }
}

#[derive(Default)]
struct Faults {
    fail_factory_lookup: AtomicBool,
    fail_connection: AtomicBool,
    fail_acknowledge: AtomicBool,
    fail_close: AtomicBool,
    /// Consumer creations allowed before the next one fails
    fail_consumer_after: AtomicUsize,
}

#[derive(Default)]
struct Counters {
    factory_lookups: AtomicUsize,
    connections_created: AtomicUsize,
    connections_open: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_open: AtomicUsize,
    consumer_attempts: AtomicUsize,
    consumers_created: AtomicUsize,
    consumers_open: AtomicUsize,
    listeners_active: AtomicUsize,
    acknowledgements: AtomicU64,
}

struct BrokerInner {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    factory_names: Mutex<HashSet<String>>,
    faults: Faults,
    stats: Counters,
}

/// Snapshot of broker resource counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStats {
    pub factory_lookups: usize,
    pub connections_created: usize,
    pub connections_open: usize,
    pub sessions_created: usize,
    pub sessions_open: usize,
    pub consumers_created: usize,
    pub consumers_open: usize,
    pub listeners_active: usize,
    pub acknowledgements: u64,
}

/// In-process broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Create a broker with a connection factory registered under
    /// [`DEFAULT_CONNECTION_FACTORY_NAME`].
    pub fn new() -> Self {
        let faults = Faults::default();
        faults.fail_consumer_after.store(NEVER, Ordering::SeqCst);

        let broker = Self {
            inner: Arc::new(BrokerInner {
                queues: Mutex::new(HashMap::new()),
                factory_names: Mutex::new(HashSet::new()),
                faults,
                stats: Counters::default(),
            }),
        };
        broker.register_connection_factory(DEFAULT_CONNECTION_FACTORY_NAME);
        broker
    }

    /// Make a connection factory resolvable under `name`.
    pub fn register_connection_factory(&self, name: &str) {
        lock(&self.inner.factory_names).insert(name.to_string());
    }

    /// Create the queue if it does not exist yet.
    pub fn declare_queue(&self, name: &str) {
        lock(&self.inner.queues)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new(name)));
    }

    /// Enqueue a message. Returns its sequence number.
    pub fn send(&self, queue: &str, mut message: MemoryMessage) -> Result<u64, BrokerError> {
        let queue = self
            .queue(queue)
            .ok_or_else(|| BrokerError::DestinationNotFound(queue.to_string()))?;

        message.sequence = queue.next_sequence.fetch_add(1, Ordering::SeqCst);
        message.receipt = Some(Receipt {
            queue: Arc::clone(&queue),
            broker: Arc::clone(&self.inner),
            handled: None,
        });
        let sequence = message.sequence;

        queue
            .sender
            .send(message)
            .map_err(|_| BrokerError::Closed("Queue"))?;
        Ok(sequence)
    }

    /// Messages handed to listeners so far.
    pub fn delivered(&self, queue: &str) -> u64 {
        self.queue(queue)
            .map(|q| q.delivered.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Highest sequence `n` such that every message `1..=n` is acknowledged.
    pub fn acknowledged_through(&self, queue: &str) -> u64 {
        self.queue(queue)
            .map(|q| q.acknowledged_through.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Whether the message with `sequence` has been acknowledged.
    pub fn is_acknowledged(&self, queue: &str, sequence: u64) -> bool {
        self.queue(queue)
            .map(|q| q.is_acknowledged(sequence))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> BrokerStats {
        let s = &self.inner.stats;
        BrokerStats {
            factory_lookups: s.factory_lookups.load(Ordering::SeqCst),
            connections_created: s.connections_created.load(Ordering::SeqCst),
            connections_open: s.connections_open.load(Ordering::SeqCst),
            sessions_created: s.sessions_created.load(Ordering::SeqCst),
            sessions_open: s.sessions_open.load(Ordering::SeqCst),
            consumers_created: s.consumers_created.load(Ordering::SeqCst),
            consumers_open: s.consumers_open.load(Ordering::SeqCst),
            listeners_active: s.listeners_active.load(Ordering::SeqCst),
            acknowledgements: s.acknowledgements.load(Ordering::SeqCst),
        }
    }

    /// Fail connection factory lookups.
    pub fn fail_factory_lookup(&self, fail: bool) {
        self.inner
            .faults
            .fail_factory_lookup
            .store(fail, Ordering::SeqCst);
    }

    /// Fail connection creation.
    pub fn fail_connections(&self, fail: bool) {
        self.inner.faults.fail_connection.store(fail, Ordering::SeqCst);
    }

    /// Fail acknowledgments.
    pub fn fail_acknowledgements(&self, fail: bool) {
        self.inner.faults.fail_acknowledge.store(fail, Ordering::SeqCst);
    }

    /// Fail every session and consumer close.
    pub fn fail_closes(&self, fail: bool) {
        self.inner.faults.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Let `allowed` more consumer creations succeed, then fail the next one.
    /// `None` disables the fault.
    pub fn fail_consumer_creation_after(&self, allowed: Option<usize>) {
        let threshold = match allowed {
            Some(n) => self.inner.stats.consumer_attempts.load(Ordering::SeqCst) + n,
            None => NEVER,
        };
        self.inner
            .faults
            .fail_consumer_after
            .store(threshold, Ordering::SeqCst);
    }

    fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        lock(&self.inner.queues).get(name).cloned()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingContext for InMemoryBroker {
    fn lookup_connection_factory(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ConnectionFactory>, BrokerError> {
        self.inner
            .stats
            .factory_lookups
            .fetch_add(1, Ordering::SeqCst);

        let registered = lock(&self.inner.factory_names).contains(name);
        if !registered || self.inner.faults.fail_factory_lookup.load(Ordering::SeqCst) {
            return Err(BrokerError::NameNotFound(name.to_string()));
        }

        Ok(Arc::new(MemoryConnectionFactory {
            broker: self.clone(),
        }))
    }
}

struct MemoryConnectionFactory {
    broker: InMemoryBroker,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn create_connection(&self) -> Result<Box<dyn Connection>, BrokerError> {
        let inner = &self.broker.inner;
        if inner.faults.fail_connection.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }

        inner.stats.connections_created.fetch_add(1, Ordering::SeqCst);
        inner.stats.connections_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    broker: InMemoryBroker,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed("Connection"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn start(&self) -> Result<(), BrokerError> {
        self.ensure_open()
    }

    async fn lookup_destination(&self, uri: &str) -> Result<Destination, BrokerError> {
        self.ensure_open()?;
        let destination = Destination::parse(uri)?;
        if self.broker.queue(&destination.name).is_none() {
            return Err(BrokerError::DestinationNotFound(destination.name));
        }
        Ok(destination)
    }

    async fn create_session(&self, ack_mode: AckMode) -> Result<Box<dyn Session>, BrokerError> {
        self.ensure_open()?;
        let stats = &self.broker.inner.stats;
        stats.sessions_created.fetch_add(1, Ordering::SeqCst);
        stats.sessions_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            broker: self.broker.clone(),
            ack_mode,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker
                .inner
                .stats
                .connections_open
                .fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemorySession {
    broker: InMemoryBroker,
    ack_mode: AckMode,
    closed: AtomicBool,
}

#[async_trait]
impl Session for MemorySession {
    fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed("Session"));
        }

        let inner = &self.broker.inner;
        let attempt = inner.stats.consumer_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= inner.faults.fail_consumer_after.load(Ordering::SeqCst) {
            return Err(BrokerError::consumer_error(format!(
                "consumer creation rejected for {}",
                destination.name
            )));
        }

        let queue = self
            .broker
            .queue(&destination.name)
            .ok_or_else(|| BrokerError::DestinationNotFound(destination.name.clone()))?;

        let index = inner.stats.consumers_created.fetch_add(1, Ordering::SeqCst);
        inner.stats.consumers_open.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryConsumer {
            id: format!("{}-consumer-{}", destination.name, index + 1),
            queue,
            broker: self.broker.clone(),
            ack_mode: self.ack_mode,
            handled: Arc::new(HandledLedger::new()),
            delivery: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.broker.inner.faults.fail_close.load(Ordering::SeqCst) {
            return Err(BrokerError::Session("close rejected".to_string()));
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker
                .inner
                .stats
                .sessions_open
                .fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryConsumer {
    id: String,
    queue: Arc<MemoryQueue>,
    broker: InMemoryBroker,
    ack_mode: AckMode,
    /// Sequences delivered here, handled and not yet acknowledged
    handled: Arc<HandledLedger<u64>>,
    delivery: tokio::sync::Mutex<Option<DeliveryTask>>,
    closed: AtomicBool,
}

impl MemoryConsumer {
    fn spawn_delivery(&self, listener: Arc<dyn MessageListener>) -> DeliveryTask {
        let queue = Arc::clone(&self.queue);
        let ack_mode = self.ack_mode;
        let handled = Arc::clone(&self.handled);
        let consumer_id = self.id.clone();

        DeliveryTask::spawn(move |mut shutdown| async move {
            debug!(consumer = %consumer_id, "Delivery started");
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    next = queue.next_message() => next,
                };
                let Some(mut message) = next else { break };
                if let (AckMode::Client, Some(receipt)) = (ack_mode, message.receipt.as_mut()) {
                    receipt.handled = Some(Arc::clone(&handled));
                }

                queue.delivered.fetch_add(1, Ordering::SeqCst);
                deliver(listener.as_ref(), &message).await;

                match ack_mode {
                    AckMode::Auto => {
                        if let Err(e) = message.acknowledge().await {
                            warn!(
                                consumer = %consumer_id,
                                message_id = %message.message_id(),
                                error = %e,
                                "Automatic acknowledgment failed"
                            );
                        }
                    }
                    AckMode::Client => {
                        if !queue.is_acknowledged(message.sequence) {
                            handled.record(message.sequence);
                        }
                    }
                }
            }
            debug!(consumer = %consumer_id, "Delivery stopped");
        })
    }
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    fn consumer_id(&self) -> &str {
        &self.id
    }

    async fn set_message_listener(
        &self,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> Result<(), BrokerError> {
        let mut delivery = self.delivery.lock().await;
        let stats = &self.broker.inner.stats;

        if let Some(task) = delivery.take() {
            task.stop(&self.id).await;
            stats.listeners_active.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(listener) = listener {
            if self.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed("Consumer"));
            }
            *delivery = Some(self.spawn_delivery(listener));
            stats.listeners_active.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.broker.inner.faults.fail_close.load(Ordering::SeqCst) {
            return Err(BrokerError::consumer_error("close rejected"));
        }

        self.set_message_listener(None).await?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            let unacknowledged = self.handled.len();
            if unacknowledged > 0 {
                debug!(
                    consumer = %self.id,
                    unacknowledged,
                    "Consumer closed with handled messages awaiting acknowledgment"
                );
            }
            self.broker
                .inner
                .stats
                .consumers_open
                .fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Option<Vec<u8>>>>,
    }

    #[async_trait]
    impl MessageListener for Recorder {
        async fn on_message(&self, message: Option<&dyn Message>) {
            lock(&self.seen).push(message.map(|m| m.payload().to_vec()));
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn consumer(broker: &InMemoryBroker, ack_mode: AckMode) -> Box<dyn MessageConsumer> {
        let factory = broker
            .lookup_connection_factory(DEFAULT_CONNECTION_FACTORY_NAME)
            .unwrap();
        let connection = factory.create_connection().await.unwrap();
        connection.start().await.unwrap();
        let destination = connection.lookup_destination("queue/Q").await.unwrap();
        let session = connection.create_session(ack_mode).await.unwrap();
        session.create_consumer(&destination).await.unwrap()
    }

    #[tokio::test]
    async fn test_delivers_to_listener_and_empty_as_absent() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("Q");
        let consumer = consumer(&broker, AckMode::Client).await;
        let recorder = Arc::new(Recorder::default());

        consumer
            .set_message_listener(Some(recorder.clone()))
            .await
            .unwrap();
        broker.send("Q", MemoryMessage::object(b"one".to_vec())).unwrap();
        broker.send("Q", MemoryMessage::empty()).unwrap();

        eventually(|| lock(&recorder.seen).len() == 2).await;
        let seen = lock(&recorder.seen).clone();
        assert_eq!(seen, vec![Some(b"one".to_vec()), None]);
        // Client mode: nothing acknowledged until the listener does it.
        assert_eq!(broker.stats().acknowledgements, 0);
    }

    #[tokio::test]
    async fn test_auto_ack_and_detach() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("Q");
        let consumer = consumer(&broker, AckMode::Auto).await;
        let recorder = Arc::new(Recorder::default());

        consumer
            .set_message_listener(Some(recorder.clone()))
            .await
            .unwrap();
        broker.send("Q", MemoryMessage::object(b"a".to_vec())).unwrap();
        eventually(|| broker.acknowledged_through("Q") == 1).await;

        consumer.set_message_listener(None).await.unwrap();
        assert_eq!(broker.stats().listeners_active, 0);

        broker.send("Q", MemoryMessage::object(b"b".to_vec())).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(lock(&recorder.seen).len(), 1);
        assert_eq!(broker.delivered("Q"), 1);
    }

    #[tokio::test]
    async fn test_auto_ack_failure_keeps_delivering() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("Q");
        let consumer = consumer(&broker, AckMode::Auto).await;
        let recorder = Arc::new(Recorder::default());
        consumer
            .set_message_listener(Some(recorder.clone()))
            .await
            .unwrap();

        broker.fail_acknowledgements(true);
        broker.send("Q", MemoryMessage::object(b"a".to_vec())).unwrap();
        broker.send("Q", MemoryMessage::object(b"b".to_vec())).unwrap();
        // "a" was fully processed once "b" reached the listener.
        eventually(|| lock(&recorder.seen).len() == 2).await;
        assert!(!broker.is_acknowledged("Q", 1));

        broker.fail_acknowledgements(false);
        broker.send("Q", MemoryMessage::object(b"c".to_vec())).unwrap();
        eventually(|| broker.is_acknowledged("Q", 3)).await;
        assert_eq!(broker.acknowledged_through("Q"), 0);
        assert_eq!(broker.stats().listeners_active, 1);
    }

    /// Blocks on `slow` payloads until released, acknowledges anything else.
    #[derive(Default)]
    struct SlowOrAcknowledge {
        slow_started: AtomicBool,
        release: tokio::sync::Notify,
        failed_acks: AtomicUsize,
    }

    #[async_trait]
    impl MessageListener for SlowOrAcknowledge {
        async fn on_message(&self, message: Option<&dyn Message>) {
            let Some(message) = message else { return };
            if message.payload() == b"slow" {
                self.slow_started.store(true, Ordering::SeqCst);
                self.release.notified().await;
            } else if message.acknowledge().await.is_err() {
                self.failed_acks.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_client_ack_is_scoped_to_the_acknowledging_consumer() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("Q");
        let first = consumer(&broker, AckMode::Client).await;
        let second = consumer(&broker, AckMode::Client).await;
        let listener = Arc::new(SlowOrAcknowledge::default());

        first
            .set_message_listener(Some(listener.clone()))
            .await
            .unwrap();
        broker.send("Q", MemoryMessage::object(b"slow".to_vec())).unwrap();
        eventually(|| listener.slow_started.load(Ordering::SeqCst)).await;

        // The first consumer is busy, so the second one takes the next message.
        second
            .set_message_listener(Some(listener.clone()))
            .await
            .unwrap();
        broker.send("Q", MemoryMessage::object(b"fast".to_vec())).unwrap();
        eventually(|| broker.stats().acknowledgements == 1).await;

        assert!(broker.is_acknowledged("Q", 2));
        assert!(!broker.is_acknowledged("Q", 1));
        assert_eq!(broker.acknowledged_through("Q"), 0);

        // Once handled, the slow message rides along with its own consumer's
        // next acknowledgment.
        listener.release.notify_one();
        second.set_message_listener(None).await.unwrap();
        broker.send("Q", MemoryMessage::object(b"later".to_vec())).unwrap();
        eventually(|| broker.stats().acknowledgements == 2).await;

        assert!(broker.is_acknowledged("Q", 1));
        assert_eq!(broker.acknowledged_through("Q"), 3);
    }

    #[tokio::test]
    async fn test_failed_client_ack_keeps_handled_messages() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("Q");
        let consumer = consumer(&broker, AckMode::Client).await;
        let listener = Arc::new(SlowOrAcknowledge::default());
        consumer
            .set_message_listener(Some(listener.clone()))
            .await
            .unwrap();

        broker.fail_acknowledgements(true);
        broker.send("Q", MemoryMessage::object(b"a".to_vec())).unwrap();
        eventually(|| listener.failed_acks.load(Ordering::SeqCst) == 1).await;
        assert_eq!(broker.acknowledged_through("Q"), 0);
        assert_eq!(broker.stats().acknowledgements, 0);

        broker.fail_acknowledgements(false);
        broker.send("Q", MemoryMessage::object(b"b".to_vec())).unwrap();
        eventually(|| broker.acknowledged_through("Q") == 2).await;
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("Q");

        broker.fail_factory_lookup(true);
        assert!(broker
            .lookup_connection_factory(DEFAULT_CONNECTION_FACTORY_NAME)
            .is_err());
        broker.fail_factory_lookup(false);
        assert!(broker.lookup_connection_factory("unknown").is_err());

        let factory = broker
            .lookup_connection_factory(DEFAULT_CONNECTION_FACTORY_NAME)
            .unwrap();
        broker.fail_connections(true);
        assert!(factory.create_connection().await.is_err());
        broker.fail_connections(false);

        let connection = factory.create_connection().await.unwrap();
        assert!(matches!(
            connection.lookup_destination("queue/Missing").await,
            Err(BrokerError::DestinationNotFound(_))
        ));

        let destination = connection.lookup_destination("queue/Q").await.unwrap();
        let session = connection.create_session(AckMode::Client).await.unwrap();
        broker.fail_consumer_creation_after(Some(1));
        assert!(session.create_consumer(&destination).await.is_ok());
        assert!(session.create_consumer(&destination).await.is_err());
        broker.fail_consumer_creation_after(None);
        assert!(session.create_consumer(&destination).await.is_ok());
        assert_eq!(broker.stats().consumers_created, 2);
    }
}
