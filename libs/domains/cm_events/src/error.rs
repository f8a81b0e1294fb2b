//! Error types for the CM events domain.

use thiserror::Error;

/// Errors raised while extracting or handling a CM event.
#[derive(Debug, Error)]
pub enum CmEventsError {
    /// Message is not an object message.
    #[error("Unsupported envelope kind: {0}")]
    UnsupportedEnvelope(&'static str),

    /// Payload is not valid JSON for a notification.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The events processor rejected the notification.
    #[error("Event processing failed: {0}")]
    Processing(String),

    /// Forwarding the notification downstream failed.
    #[error("Failed to publish event to {subject}: {reason}")]
    Publish { subject: String, reason: String },
}
