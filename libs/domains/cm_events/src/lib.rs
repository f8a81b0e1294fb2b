//! CM Events Domain
//!
//! Classifies CM data-change notifications taken off the diverted queue and
//! forwards them to a [`SubscribedEventsProcessor`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ CmDataChangeDivertedQueue    │  ← N consumers (queue_connector)
//! └──────────────┬───────────────┘
//!                │ on_message
//! ┌──────────────▼───────────────┐
//! │ CmDataChangeListener         │  ← count → classify → flush ack
//! └──────────────┬───────────────┘
//!                │ Node / ComEcim / DataChange
//! ┌──────────────▼───────────────┐
//! │ SubscribedEventsProcessor    │  ← downstream
//! └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_cm_events::{CmDataChangeListener, LoggingEventsProcessor};
//! use queue_connector::AckBatcher;
//!
//! let listener = CmDataChangeListener::new(
//!     Arc::new(LoggingEventsProcessor),
//!     Arc::new(AckBatcher::default()),
//! );
//! ```

pub mod error;
pub mod listener;
pub mod notification;
pub mod processor;
pub mod queue;

pub use error::CmEventsError;
pub use listener::CmDataChangeListener;
pub use notification::{
    AttributeChange, ChangeNotification, ComEcimNodeNotification, DpsDataChangedEvent,
    NodeNotification, Notification, Payload,
};
pub use processor::{LoggingEventsProcessor, SubscribedEventsProcessor};
pub use queue::CmDataChangeDivertedQueue;
