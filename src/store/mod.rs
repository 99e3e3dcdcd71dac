//! Durable state accessors
//!
//! This module provides:
//! - `AckStore`: read-latest / append of per-consumer ack watermarks
//! - `MessageSource`: undelivered message fetches for a consumer
//! - `Heartbeater`: liveness reports to the coordination point
//! - `Resilient`: retry-forever decorator applied to the first two
//! - Postgres implementations of all three, sharing one `deadpool` pool
//!
//! # Schema
//!
//! Each topic gets its own ack table (`<topic>_acks`) and message table
//! (`<topic>_messages`):
//!
//! - Ack rows: `(consumer_id, message_id, source, created_at)`; the latest
//!   ack is `ORDER BY message_id DESC LIMIT 1`
//! - Message rows: `(id, content, message_type, properties, generated_at)`
//!   with `id` a `BIGSERIAL`, so id order is insertion order

pub mod ack;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod naming;
pub mod retry;

pub use ack::{AckStore, PgAckStore};
pub use connection::StoreConfig;
pub use heartbeat::{Heartbeater, PgHeartbeater};
pub use messages::{MessageSource, PgMessageStore};
pub use retry::Resilient;
