//! Consumer pool.
//!
//! N consumers on one destination, each on its own client-acknowledged
//! session. All consumers share the same listener instance.

use crate::broker::{AckMode, MessageConsumer, MessageListener};
use crate::connection::ConnectionManager;
use crate::error::ConnectorError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Consumers created for one connector.
#[derive(Default)]
pub struct ConsumerPool {
    consumers: Vec<Box<dyn MessageConsumer>>,
}

impl ConsumerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `concurrency` consumers on `destination_uri`.
    ///
    /// All or nothing: if any session or consumer cannot be created, the
    /// consumers created so far are closed and the pool stays empty.
    pub async fn create_consumers(
        &mut self,
        manager: &mut ConnectionManager,
        destination_uri: &str,
        concurrency: usize,
    ) -> Result<(), ConnectorError> {
        let destination = manager.lookup_destination(destination_uri).await?;
        info!(
            destination = %destination,
            concurrency,
            "Creating consumers"
        );

        let mut created: Vec<Box<dyn MessageConsumer>> = Vec::with_capacity(concurrency);
        for slot in 0..concurrency {
            let result = match manager.create_session(AckMode::Client).await {
                Ok(session) => session
                    .create_consumer(&destination)
                    .await
                    .map_err(ConnectorError::ConsumerCreation),
                Err(e) => Err(e),
            };

            match result {
                Ok(consumer) => {
                    debug!(slot, consumer = %consumer.consumer_id(), "Consumer created");
                    created.push(consumer);
                }
                Err(e) => {
                    warn!(slot, error = %e, "Consumer creation failed, discarding pool");
                    close_all(created).await;
                    return Err(e);
                }
            }
        }

        self.consumers.extend(created);
        Ok(())
    }

    /// Register `listener` on every consumer.
    pub async fn attach_dispatcher(
        &self,
        listener: Arc<dyn MessageListener>,
    ) -> Result<(), ConnectorError> {
        for consumer in &self.consumers {
            consumer
                .set_message_listener(Some(Arc::clone(&listener)))
                .await
                .map_err(ConnectorError::ConsumerCreation)?;
        }
        info!(consumers = self.consumers.len(), "Listener registered on consumers");
        Ok(())
    }

    /// Unregister the listener from, then close, every consumer.
    ///
    /// Failures are logged and returned; remaining consumers are still
    /// processed. The pool is empty afterwards.
    pub async fn detach_and_close(&mut self) -> Vec<ConnectorError> {
        if self.consumers.is_empty() {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for consumer in self.consumers.drain(..) {
            if let Err(e) = consumer.set_message_listener(None).await {
                let err = ConnectorError::Shutdown(e);
                warn!(consumer = %consumer.consumer_id(), error = %err, "Failed to unregister listener");
                failures.push(err);
            }
            if let Err(e) = consumer.close().await {
                let err = ConnectorError::Shutdown(e);
                warn!(consumer = %consumer.consumer_id(), error = %err, "Failed to close consumer");
                failures.push(err);
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

async fn close_all(consumers: Vec<Box<dyn MessageConsumer>>) {
    for consumer in consumers {
        if let Err(e) = consumer.close().await {
            warn!(consumer = %consumer.consumer_id(), error = %e, "Failed to close discarded consumer");
        }
    }
}
