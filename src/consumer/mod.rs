/// Consumer delivery core
///
/// This module provides:
/// - `ConsumerWorkerManager`: registry of workers keyed by consumer identity,
///   entry point for greet / ack / disconnect events, and owner of the
///   ack flush, idle eviction and heartbeat loops
/// - `Worker`: per-consumer fetch / dispatch / ack tracking
/// - `Channel`: the seam to the transport layer's connections
///
/// # Delivery guarantee
///
/// Delivery is at-least-once. Acks raise an in-memory watermark; the
/// manager persists it in batches, so a crash can replay messages acked
/// since the last flush but never skips unacked ones.

pub mod channel;
pub mod manager;
pub mod worker;

pub use channel::{Channel, ChannelId};
pub use manager::{ConsumerWorkerManager, BATCH_ACK_SOURCE};
pub use worker::{ConsumerWorker, DefaultWorkerFactory, Worker, WorkerFactory, WorkerState};
