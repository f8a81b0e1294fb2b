//! CM change notifications.
//!
//! Three payload shapes arrive on the diverted queue. On the wire each is a
//! JSON object tagged by `payloadType`:
//!
//! ```json
//! {"payloadType": "NodeNotification", "fdn": "NetworkElement=1", "creationTimestamp": "..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoStaticStr;

/// Identifier and timestamp view shared by every notification variant.
pub trait ChangeNotification {
    /// Fully distinguished name of the changed managed object.
    fn fdn(&self) -> Option<&str>;

    /// When the change happened, as reported by the source.
    fn timestamp(&self) -> Option<String>;
}

/// Notification from a CPP node: flat managed-object change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeNotification {
    pub fdn: String,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Notification from a COM/ECIM node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComEcimNodeNotification {
    pub dn: String,
    pub timestamp: String,
    pub generation_counter: u64,
    pub sequence_number: u64,
    #[serde(default)]
    pub delta: bool,
}

/// One attribute change of a data-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeChange {
    pub name: String,
    #[serde(default)]
    pub old_value: serde_json::Value,
    #[serde(default)]
    pub new_value: serde_json::Value,
}

/// Data-change event raised by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DpsDataChangedEvent {
    pub fdn: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub mo_type: String,
    pub version: String,
    pub po_id: u64,
    #[serde(default)]
    pub changed_attributes: Vec<AttributeChange>,
}

/// A classified notification, as handed to the events processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "payloadType")]
#[strum(serialize_all = "snake_case")]
pub enum Notification {
    #[serde(rename = "NodeNotification")]
    Node(NodeNotification),
    #[serde(rename = "ComEcimNodeNotification")]
    ComEcim(ComEcimNodeNotification),
    #[serde(rename = "DpsDataChangedEvent")]
    DataChange(DpsDataChangedEvent),
}

impl Notification {
    /// Short variant label for logs and metrics.
    pub fn variant(&self) -> &'static str {
        self.into()
    }
}

/// Decoded message payload, including shapes this service does not handle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "payloadType")]
pub enum Payload {
    NodeNotification(NodeNotification),
    ComEcimNodeNotification(ComEcimNodeNotification),
    DpsDataChangedEvent(DpsDataChangedEvent),
    #[serde(other)]
    Unrecognized,
}

impl Payload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// The classified notification, `None` for unrecognized payloads.
    pub fn into_notification(self) -> Option<Notification> {
        match self {
            Self::NodeNotification(n) => Some(Notification::Node(n)),
            Self::ComEcimNodeNotification(n) => Some(Notification::ComEcim(n)),
            Self::DpsDataChangedEvent(e) => Some(Notification::DataChange(e)),
            Self::Unrecognized => None,
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.trim().is_empty()).then_some(value)
}

impl ChangeNotification for NodeNotification {
    fn fdn(&self) -> Option<&str> {
        non_empty(&self.fdn)
    }

    fn timestamp(&self) -> Option<String> {
        Some(self.creation_timestamp.to_rfc3339())
    }
}

impl ChangeNotification for ComEcimNodeNotification {
    fn fdn(&self) -> Option<&str> {
        non_empty(&self.dn)
    }

    fn timestamp(&self) -> Option<String> {
        non_empty(&self.timestamp).map(str::to_string)
    }
}

impl ChangeNotification for DpsDataChangedEvent {
    fn fdn(&self) -> Option<&str> {
        non_empty(&self.fdn)
    }

    fn timestamp(&self) -> Option<String> {
        None
    }
}

impl ChangeNotification for Notification {
    fn fdn(&self) -> Option<&str> {
        match self {
            Self::Node(n) => n.fdn(),
            Self::ComEcim(n) => n.fdn(),
            Self::DataChange(e) => e.fdn(),
        }
    }

    fn timestamp(&self) -> Option<String> {
        match self {
            Self::Node(n) => n.timestamp(),
            Self::ComEcim(n) => n.timestamp(),
            Self::DataChange(e) => e.timestamp(),
        }
    }
}
