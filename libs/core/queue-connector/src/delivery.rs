//! Push-delivery task shared by the broker bindings.

use crate::broker::{Message, MessageListener};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Background task pushing messages from one consumer to its listener.
pub(crate) struct DeliveryTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DeliveryTask {
    /// Spawn the delivery loop. The loop must return once the receiver
    /// observes `true`, and only between two messages.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(shutdown_rx));
        Self { shutdown, handle }
    }

    /// Signal the loop and wait for the in-flight message to complete.
    pub(crate) async fn stop(self, consumer_id: &str) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(consumer = %consumer_id, error = %e, "Delivery task ended abnormally");
        }
    }
}

/// Hand one received message to the listener. Empty payloads are delivered
/// as absent.
pub(crate) async fn deliver(listener: &dyn MessageListener, message: &dyn Message) {
    if message.payload().is_empty() {
        listener.on_message(None).await;
    } else {
        listener.on_message(Some(message)).await;
    }
}

/// Messages one consumer has finished handling and not yet acknowledged.
///
/// Client acknowledgment from a consumer covers exactly these plus the
/// message being acknowledged. Deliveries still in flight on other
/// consumers of the same queue are never part of it.
pub(crate) struct HandledLedger<T> {
    entries: Mutex<Vec<T>>,
}

impl<T> HandledLedger<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn record(&self, entry: T) {
        lock(&self.entries).push(entry);
    }

    /// Remove and return every recorded entry, oldest first.
    pub(crate) fn take(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.entries))
    }

    /// Put back entries whose acknowledgment failed, ahead of anything
    /// recorded since they were taken.
    pub(crate) fn restore(&self, mut entries: Vec<T>) {
        let mut current = lock(&self.entries);
        entries.append(&mut current);
        *current = entries;
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
