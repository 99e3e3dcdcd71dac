use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one logical subscriber: a (topic, consumer name) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsumerId {
    pub topic: String,
    pub consumer: String,
}

impl ConsumerId {
    pub fn new(topic: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            consumer: consumer.into(),
        }
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.consumer)
    }
}

/// Delivery guarantee requested by a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerType {
    /// Acks are persisted so the consumer resumes where it left off
    DurableAtLeastOnce,
    /// Nothing is persisted; a new session starts at the topic tail
    NonDurable,
}

impl ConsumerType {
    pub fn is_durable(self) -> bool {
        matches!(self, ConsumerType::DurableAtLeastOnce)
    }
}

/// Consumer identity plus the classification supplied at greet time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub consumer_id: ConsumerId,
    pub consumer_type: ConsumerType,
}

impl ConsumerInfo {
    pub fn new(consumer_id: ConsumerId, consumer_type: ConsumerType) -> Self {
        Self {
            consumer_id,
            consumer_type,
        }
    }

    /// Durable at-least-once consumer for `topic`
    pub fn durable(topic: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self::new(ConsumerId::new(topic, consumer), ConsumerType::DurableAtLeastOnce)
    }

    /// Non-durable consumer for `topic`
    pub fn non_durable(topic: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self::new(ConsumerId::new(topic, consumer), ConsumerType::NonDurable)
    }

    pub fn topic(&self) -> &str {
        &self.consumer_id.topic
    }

    pub fn consumer(&self) -> &str {
        &self.consumer_id.consumer
    }
}

impl fmt::Display for ConsumerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.consumer_id, self.consumer_type)
    }
}

/// How an ack releases in-flight deliveries on its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckKind {
    /// Releases exactly the acked message
    Single,
    /// Releases every in-flight message up to and including the acked id
    Cumulative,
}
