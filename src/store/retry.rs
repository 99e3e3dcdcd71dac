//! Retry-forever decorator for store accessors.
//!
//! [`Resilient`] wraps an [`AckStore`] or [`MessageSource`] and turns every
//! transient failure into a log line, a fixed sleep and another attempt.
//! Callers see latency instead of outages. Errors that no retry can fix,
//! such as a rejected topic name, are returned at once. The sleep holds no
//! lock, so only the calling task stalls while the store is unreachable.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::error;

use crate::error::Result;
use crate::store::{AckStore, MessageSource};
use crate::types::{Message, MessageFilter, MessageId};

/// Store accessor that retries transient failures indefinitely
pub struct Resilient<S> {
    inner: S,
    target: String,
    retry_interval: Duration,
}

impl<S> Resilient<S> {
    /// Wrap `inner`; `target` names it in log lines
    pub fn new(inner: S, target: impl Into<String>, retry_interval: Duration) -> Self {
        Self {
            inner,
            target: target.into(),
            retry_interval,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Run `call` until it succeeds, sleeping `retry_interval` after each
    /// transient failure
    ///
    /// A non-transient error (see [`Error::is_transient`](crate::Error::is_transient))
    /// ends the loop and is returned to the caller.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u64 = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => {
                    error!(
                        target_store = %self.target,
                        operation,
                        error = %err,
                        "store call rejected, not retrying"
                    );
                    return Err(err);
                }
                Err(err) => {
                    attempt += 1;
                    error!(
                        target_store = %self.target,
                        operation,
                        attempt,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        error = %err,
                        "store call failed, waiting before retry"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl<S: AckStore> AckStore for Resilient<S> {
    async fn get_max_message_id(&self, topic: &str, consumer: &str) -> Result<Option<MessageId>> {
        self.call("get_max_message_id", || self.inner.get_max_message_id(topic, consumer))
            .await
    }

    async fn add(&self, topic: &str, consumer: &str, message_id: MessageId, source: &str) -> Result<()> {
        self.call("add", || self.inner.add(topic, consumer, message_id, source))
            .await
    }
}

#[async_trait]
impl<S: MessageSource> MessageSource for Resilient<S> {
    async fn fetch_after(
        &self,
        topic: &str,
        consumer: &str,
        after: MessageId,
        filter: &MessageFilter,
        limit: i64,
    ) -> Result<Vec<Message>> {
        self.call("fetch_after", || {
            self.inner.fetch_after(topic, consumer, after, filter, limit)
        })
        .await
    }

    async fn latest_message_id(&self, topic: &str) -> Result<Option<MessageId>> {
        self.call("latest_message_id", || self.inner.latest_message_id(topic))
            .await
    }
}
