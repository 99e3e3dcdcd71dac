use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;
use crate::types::Delivery;

/// Identifier of one consumer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ChannelId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A consumer connection as seen by the delivery core
///
/// The transport layer implements this for its sockets. The core only
/// sends decoded deliveries and closes; it never touches wire bytes.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable id for the life of the connection
    fn id(&self) -> ChannelId;

    /// Peer address, for logs
    fn remote_addr(&self) -> String;

    /// Whether the transport still considers the connection open
    fn is_connected(&self) -> bool;

    /// Hand one delivery to the connection
    async fn send(&self, delivery: &Delivery) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}
