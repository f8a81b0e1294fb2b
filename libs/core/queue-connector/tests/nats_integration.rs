//! Integration tests for the NATS JetStream binding
//!
//! These tests run a real NATS server with JetStream via testcontainers:
//! - The connector starts its consumers against an existing stream
//! - Object and text envelopes reach the listener
//! - One batched client acknowledgment clears the durable's pending set
//! - A missing stream fails startup
//!
//! They need Docker and are ignored by default:
//! `cargo test -p queue-connector --test nats_integration -- --ignored`

use async_nats::jetstream::{self, stream};
use async_nats::HeaderMap;
use async_trait::async_trait;
use queue_connector::nats::{NatsBrokerConfig, NatsNamingContext};
use queue_connector::{
    AckBatcher, ConnectorConfig, EnvelopeKind, FlushOutcome, LifecycleState, Message,
    MessageListener, QueueConnector, MESSAGE_KIND_HEADER,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

const STREAM: &str = "CmDataChangeDivertedQueue";
const SUBJECT: &str = "cm.diverted";
const DURABLE: &str = "queue-connector-it";

/// NATS container with JetStream enabled. Stopped when dropped.
struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    url: String,
}

impl TestNats {
    async fn new() -> Self {
        let container = Nats::default()
            .with_tag("latest")
            .with_cmd(["-js"])
            .start()
            .await
            .expect("Failed to start NATS container");

        let port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("Failed to get NATS port");

        Self {
            container,
            url: format!("nats://127.0.0.1:{}", port),
        }
    }

    async fn jetstream(&self) -> jetstream::Context {
        let client = async_nats::connect(&self.url)
            .await
            .expect("Failed to connect to NATS");
        jetstream::new(client)
    }
}

/// Records what it receives and flushes through the batcher.
struct Recording {
    batcher: AckBatcher,
    seen: Mutex<Vec<String>>,
    flushes: Mutex<Vec<FlushOutcome>>,
}

impl Recording {
    fn new(threshold: u64) -> Self {
        Self {
            batcher: AckBatcher::new(threshold),
            seen: Mutex::new(Vec::new()),
            flushes: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageListener for Recording {
    async fn on_message(&self, message: Option<&dyn Message>) {
        self.batcher.record_receipt();
        let Some(message) = message else { return };

        let label = match message.kind() {
            EnvelopeKind::Object => serde_json::from_slice::<Value>(message.payload())
                .ok()
                .and_then(|v| v["payloadType"].as_str().map(str::to_string))
                .unwrap_or_else(|| "unparseable".to_string()),
            other => other.as_str().to_string(),
        };
        self.seen.lock().unwrap().push(label);

        let outcome = self.batcher.flush_if_due(message).await;
        if outcome != FlushOutcome::NotDue {
            self.flushes.lock().unwrap().push(outcome);
        }
    }
}

fn connector(nats: &TestNats, destination: &str, listener: Arc<Recording>) -> QueueConnector {
    let broker = NatsBrokerConfig::new(nats.url.clone(), DURABLE)
        .with_connection_name("queue-connector-it")
        .with_ack_wait(Duration::from_secs(30));

    QueueConnector::new(
        ConnectorConfig::new(STREAM, destination).with_property_namespace("it.nats"),
        Arc::new(NatsNamingContext::new(broker)),
        listener,
    )
}

async fn publish_object(jetstream: &jetstream::Context, payload: Value) {
    jetstream
        .publish(SUBJECT, payload.to_string().into())
        .await
        .unwrap()
        .await
        .unwrap();
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_consumes_and_acknowledges_in_one_batch() {
    let nats = TestNats::new().await;
    let jetstream = nats.jetstream().await;
    let stream = jetstream
        .create_stream(stream::Config {
            name: STREAM.to_string(),
            subjects: vec![SUBJECT.to_string()],
            ..Default::default()
        })
        .await
        .expect("Failed to create stream");

    let listener = Arc::new(Recording::new(4));
    let connector = connector(&nats, "queue/CmDataChangeDivertedQueue", listener.clone());
    assert!(connector.start().await);
    assert_eq!(connector.state(), LifecycleState::Active);
    assert_eq!(connector.consumer_count(), 1);

    publish_object(
        &jetstream,
        json!({
            "payloadType": "NodeNotification",
            "fdn": "NetworkElement=1",
            "creationTimestamp": "2024-03-01T10:00:00Z"
        }),
    )
    .await;
    publish_object(
        &jetstream,
        json!({
            "payloadType": "ComEcimNodeNotification",
            "dn": "ManagedElement=1",
            "timestamp": "2024-03-01T10:00:01Z",
            "generationCounter": 3,
            "sequenceNumber": 9,
            "delta": true
        }),
    )
    .await;
    publish_object(
        &jetstream,
        json!({
            "payloadType": "DpsDataChangedEvent",
            "fdn": "NetworkElement=2",
            "namespace": "OSS_NE_DEF",
            "type": "NetworkElement",
            "version": "2.0.0",
            "poId": 1001,
            "changedAttributes": []
        }),
    )
    .await;

    let mut headers = HeaderMap::new();
    headers.insert(MESSAGE_KIND_HEADER, "text");
    jetstream
        .publish_with_headers(SUBJECT, headers, "not an object".into())
        .await
        .unwrap()
        .await
        .unwrap();

    eventually(|| listener.seen().len() == 4).await;
    assert_eq!(
        listener.seen(),
        vec![
            "NodeNotification",
            "ComEcimNodeNotification",
            "DpsDataChangedEvent",
            "text"
        ]
    );

    eventually(|| listener.batcher.flush_count() == 1).await;
    assert_eq!(
        listener.flushes.lock().unwrap().clone(),
        vec![FlushOutcome::Flushed(4)]
    );
    assert_eq!(listener.batcher.pending(), 0);

    // Explicit acks for the whole batch reach the server.
    let mut durable: jetstream::consumer::PullConsumer = stream
        .get_consumer(DURABLE)
        .await
        .expect("Durable consumer should exist");
    for _ in 0..100 {
        if durable.info().await.unwrap().num_ack_pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let info = durable.info().await.unwrap();
    assert_eq!(info.num_ack_pending, 0);
    assert_eq!(info.ack_floor.stream_sequence, 4);

    connector.stop().await;
    assert_eq!(connector.state(), LifecycleState::Stopped);
    assert_eq!(connector.consumer_count(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unknown_stream_fails_startup() {
    let nats = TestNats::new().await;

    let listener = Arc::new(Recording::new(4));
    let connector = connector(&nats, "queue/NoSuchStream", listener);

    assert!(!connector.start().await);
    assert_eq!(connector.state(), LifecycleState::Stopped);
    assert_eq!(connector.consumer_count(), 0);
}
