use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::ConsumerId;

/// Store-assigned message identifier
///
/// Ids are allocated by the message store in insertion order, so comparing
/// two ids compares their publish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    /// The id preceding every stored message
    pub const ZERO: MessageId = MessageId(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message read from a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier
    pub id: MessageId,

    /// Payload as published by the producer
    pub content: String,

    /// Optional message type, used by type filters
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    /// Producer-supplied properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    /// UTC timestamp when the producer generated the message
    pub generated_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with no type and no properties
    pub fn new(id: impl Into<MessageId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            message_type: None,
            properties: None,
            generated_at: Utc::now(),
        }
    }

    /// Set the message type (builder pattern)
    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Set the properties (builder pattern)
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Get a string property if present
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
    }
}

/// A message addressed to one consumer, as handed to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub consumer_id: ConsumerId,
    pub message: Message,
}
