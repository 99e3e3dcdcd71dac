//! Per-consumer delivery worker.
//!
//! A [`Worker`] owns every live connection of one consumer identity. It pulls
//! undelivered messages from the [`MessageSource`], hands each to a connection
//! with spare capacity, and tracks what is still unacked per connection.
//!
//! ## Lifecycle
//! ```text
//! Attaching ──(fetcher started)──► Active ──(stop_fetching / idle drain)──► Draining ──(close)──► Closed
//! ```
//! - Connections can attach while `Attaching` or `Active`, never after.
//! - Acks raise the in-memory watermark in any state; persisting it is the
//!   manager's job.
//! - A connection that goes away returns its unacked messages to the front
//!   of the pending queue so a sibling connection receives them.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::consumer::channel::{Channel, ChannelId};
use crate::error::Result;
use crate::store::{AckStore, MessageSource};
use crate::types::{AckKind, ConsumerInfo, ConsumerType, Delivery, Message, MessageFilter, MessageId};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Attaching,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Attaching => "attaching",
            WorkerState::Active => "active",
            WorkerState::Draining => "draining",
            WorkerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Operations the manager drives on a consumer's worker
#[async_trait]
pub trait ConsumerWorker: Send + Sync {
    fn consumer_info(&self) -> &ConsumerInfo;

    fn consumer_type(&self) -> ConsumerType {
        self.consumer_info().consumer_type
    }

    fn state(&self) -> WorkerState;

    /// Register a connection; `false` when the worker no longer accepts connections
    fn attach_channel(&self, channel: Arc<dyn Channel>, parallelism: usize) -> bool;

    /// Forget a connection, returning its unacked messages to the pending queue
    fn detach_channel(&self, channel_id: ChannelId);

    /// Record an ack from `channel_id`
    ///
    /// The watermark becomes `max(watermark, message_id)`; acks at or below
    /// it never lower it.
    fn handle_ack(&self, channel_id: ChannelId, message_id: MessageId, kind: AckKind);

    fn all_channels_disconnected(&self) -> bool;

    /// Atomically move to `Draining` if no connection is attached
    fn begin_draining_if_idle(&self) -> bool;

    /// Highest message id acked in memory, `MessageId::ZERO` before any ack
    fn max_acked_message_id(&self) -> MessageId;

    /// Stop pulling messages and wait for the fetcher to finish
    async fn stop_fetching(&self);

    /// Process queued acks, then stop the ack dispatcher
    async fn stop_ack_dispatch(&self);

    /// Close every connection and release the worker's tasks
    async fn close(&self) -> Result<()>;
}

/// Builds workers for the manager
pub trait WorkerFactory: Send + Sync {
    fn create(&self, info: &ConsumerInfo, filter: MessageFilter) -> Arc<dyn ConsumerWorker>;
}

/// Factory producing [`Worker`]s over shared stores
pub struct DefaultWorkerFactory {
    config: ServerConfig,
    ack_store: Arc<dyn AckStore>,
    source: Arc<dyn MessageSource>,
}

impl DefaultWorkerFactory {
    pub fn new(config: ServerConfig, ack_store: Arc<dyn AckStore>, source: Arc<dyn MessageSource>) -> Self {
        Self {
            config,
            ack_store,
            source,
        }
    }
}

impl WorkerFactory for DefaultWorkerFactory {
    fn create(&self, info: &ConsumerInfo, filter: MessageFilter) -> Arc<dyn ConsumerWorker> {
        Arc::new(Worker::new(
            info.clone(),
            filter,
            self.config.clone(),
            Arc::clone(&self.ack_store),
            Arc::clone(&self.source),
        ))
    }
}

#[derive(Debug)]
struct AckEvent {
    channel_id: ChannelId,
    message_id: MessageId,
    kind: AckKind,
}

struct ChannelSlot {
    channel: Arc<dyn Channel>,
    parallelism: usize,
    in_flight: BTreeMap<MessageId, Message>,
}

impl ChannelSlot {
    fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.parallelism
    }
}

/// Connection table and pending queue, guarded together so a detach can
/// requeue in-flight messages atomically.
struct Dispatch {
    state: WorkerState,
    channels: HashMap<ChannelId, ChannelSlot>,
    pending: VecDeque<Message>,
}

impl Dispatch {
    fn remove_channel(&mut self, channel_id: ChannelId) -> Option<Arc<dyn Channel>> {
        let slot = self.channels.remove(&channel_id)?;
        for message in slot.in_flight.into_values().rev() {
            self.pending.push_front(message);
        }
        Some(slot.channel)
    }

    /// Drop channels the transport reports as closed, requeueing their messages
    fn prune_disconnected(&mut self) -> Vec<ChannelId> {
        let gone: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, slot)| !slot.channel.is_connected())
            .map(|(id, _)| *id)
            .collect();
        for channel_id in &gone {
            self.remove_channel(*channel_id);
        }
        gone
    }
}

struct Shared {
    info: ConsumerInfo,
    filter: MessageFilter,
    config: ServerConfig,
    ack_store: Arc<dyn AckStore>,
    source: Arc<dyn MessageSource>,
    dispatch: Mutex<Dispatch>,
    max_acked: AtomicI64,
    wake: Notify,
}

impl Shared {
    fn dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, channel_id: ChannelId, reason: &str) {
        let removed = {
            let mut dispatch = self.dispatch();
            let removed = dispatch.remove_channel(channel_id);
            removed.map(|channel| (channel, dispatch.pending.len(), dispatch.channels.len()))
        };

        if let Some((channel, pending, remaining)) = removed {
            info!(
                consumer = %self.info.consumer_id,
                channel = %channel_id,
                remote = %channel.remote_addr(),
                reason,
                pending,
                remaining,
                "channel detached"
            );
            self.wake.notify_one();
        }
    }

    fn log_pruned(&self, gone: &[ChannelId]) {
        for channel_id in gone {
            debug!(consumer = %self.info.consumer_id, channel = %channel_id, "dropped disconnected channel");
        }
    }

    fn enqueue(&self, messages: Vec<Message>) {
        let mut dispatch = self.dispatch();
        dispatch
            .pending
            .extend(messages.into_iter().filter(|m| self.filter.matches(m)));
    }

    fn pending_is_empty(&self) -> bool {
        self.dispatch().pending.is_empty()
    }

    /// Pop the next pending message and book it on the least loaded usable channel
    fn reserve_next(&self) -> Option<(Arc<dyn Channel>, Message)> {
        let mut dispatch = self.dispatch();
        if dispatch.pending.is_empty() {
            return None;
        }

        self.log_pruned(&dispatch.prune_disconnected());

        let channel_id = dispatch
            .channels
            .iter()
            .filter(|(_, slot)| slot.has_capacity())
            .min_by_key(|(_, slot)| slot.in_flight.len())
            .map(|(id, _)| *id)?;

        let message = dispatch.pending.pop_front()?;
        let slot = dispatch.channels.get_mut(&channel_id)?;
        slot.in_flight.insert(message.id, message.clone());
        Some((Arc::clone(&slot.channel), message))
    }

    fn release(&self, event: AckEvent) {
        {
            let mut dispatch = self.dispatch();
            let Some(slot) = dispatch.channels.get_mut(&event.channel_id) else {
                debug!(
                    consumer = %self.info.consumer_id,
                    channel = %event.channel_id,
                    message_id = %event.message_id,
                    "ack from a channel that is no longer attached"
                );
                return;
            };
            match event.kind {
                AckKind::Single => {
                    slot.in_flight.remove(&event.message_id);
                }
                AckKind::Cumulative => {
                    slot.in_flight.retain(|id, _| *id > event.message_id);
                }
            }
        }
        self.wake.notify_one();
    }

    fn mark_active(&self) {
        let mut dispatch = self.dispatch();
        if dispatch.state == WorkerState::Attaching {
            dispatch.state = WorkerState::Active;
        }
    }

    async fn start_position(&self) -> Result<MessageId> {
        let topic = self.info.topic();
        if self.info.consumer_type.is_durable() {
            if let Some(acked) = self.ack_store.get_max_message_id(topic, self.info.consumer()).await? {
                return Ok(acked);
            }
        }
        Ok(self
            .source
            .latest_message_id(topic)
            .await?
            .unwrap_or(MessageId::ZERO))
    }

    async fn resolve_start(&self, token: &CancellationToken) -> Option<MessageId> {
        loop {
            let resolved = tokio::select! {
                _ = token.cancelled() => return None,
                resolved = self.start_position() => resolved,
            };
            match resolved {
                Ok(position) => return Some(position),
                Err(err) => {
                    error!(consumer = %self.info.consumer_id, error = %err, "failed to resolve start position");
                    tokio::select! {
                        _ = token.cancelled() => return None,
                        _ = tokio::time::sleep(self.config.retry_interval()) => {}
                    }
                }
            }
        }
    }

    /// Wait for capacity, new connections or the poll interval; `false` once cancelled
    async fn idle_wait(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = self.wake.notified() => true,
            _ = tokio::time::sleep(self.config.fetch_poll_interval()) => true,
        }
    }
}

async fn run_fetcher(shared: Arc<Shared>, token: CancellationToken) {
    let Some(mut cursor) = shared.resolve_start(&token).await else {
        return;
    };
    shared.mark_active();
    info!(consumer = %shared.info.consumer_id, start_after = %cursor, "fetcher started");

    loop {
        if token.is_cancelled() {
            break;
        }

        if shared.pending_is_empty() {
            let fetched = tokio::select! {
                _ = token.cancelled() => break,
                fetched = shared.source.fetch_after(
                    shared.info.topic(),
                    shared.info.consumer(),
                    cursor,
                    &shared.filter,
                    shared.config.fetch_batch_size,
                ) => fetched,
            };

            match fetched {
                Ok(messages) if !messages.is_empty() => {
                    if let Some(last) = messages.last() {
                        cursor = cursor.max(last.id);
                    }
                    shared.enqueue(messages);
                }
                Ok(_) => {
                    if !shared.idle_wait(&token).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(consumer = %shared.info.consumer_id, error = %err, "fetch failed");
                    if !shared.idle_wait(&token).await {
                        break;
                    }
                }
            }
            continue;
        }

        let Some((channel, message)) = shared.reserve_next() else {
            if !shared.idle_wait(&token).await {
                break;
            }
            continue;
        };

        let delivery = Delivery {
            consumer_id: shared.info.consumer_id.clone(),
            message,
        };
        if let Err(err) = channel.send(&delivery).await {
            warn!(
                consumer = %shared.info.consumer_id,
                channel = %channel.id(),
                message_id = %delivery.message.id,
                error = %err,
                "send failed, dropping channel"
            );
            shared.detach(channel.id(), "send failed");
            if let Err(err) = channel.close().await {
                debug!(channel = %channel.id(), error = %err, "close after failed send");
            }
        }
    }

    debug!(consumer = %shared.info.consumer_id, "fetcher stopped");
}

async fn run_ack_dispatcher(shared: Arc<Shared>, mut acks: mpsc::UnboundedReceiver<AckEvent>) {
    while let Some(event) = acks.recv().await {
        shared.release(event);
    }
    debug!(consumer = %shared.info.consumer_id, "ack dispatcher stopped");
}

struct Tasks {
    started: bool,
    fetch_token: CancellationToken,
    fetcher: Option<JoinHandle<()>>,
    ack_tx: Option<mpsc::UnboundedSender<AckEvent>>,
    ack_dispatcher: Option<JoinHandle<()>>,
}

/// Delivery worker for one consumer identity
pub struct Worker {
    shared: Arc<Shared>,
    tasks: Mutex<Tasks>,
}

impl Worker {
    pub fn new(
        info: ConsumerInfo,
        filter: MessageFilter,
        config: ServerConfig,
        ack_store: Arc<dyn AckStore>,
        source: Arc<dyn MessageSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                info,
                filter,
                config,
                ack_store,
                source,
                dispatch: Mutex::new(Dispatch {
                    state: WorkerState::Attaching,
                    channels: HashMap::new(),
                    pending: VecDeque::new(),
                }),
                max_acked: AtomicI64::new(MessageId::ZERO.value()),
                wake: Notify::new(),
            }),
            tasks: Mutex::new(Tasks {
                started: false,
                fetch_token: CancellationToken::new(),
                fetcher: None,
                ack_tx: None,
                ack_dispatcher: None,
            }),
        }
    }

    pub fn filter(&self) -> &MessageFilter {
        &self.shared.filter
    }

    pub fn connected_channel_count(&self) -> usize {
        self.shared.dispatch().channels.len()
    }

    /// Deliveries sent but not yet acked, across all connections
    pub fn in_flight_count(&self) -> usize {
        self.shared
            .dispatch()
            .channels
            .values()
            .map(|slot| slot.in_flight.len())
            .sum()
    }

    /// Messages fetched or requeued but not yet handed to a connection
    pub fn pending_count(&self) -> usize {
        self.shared.dispatch().pending.len()
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_tasks(&self) {
        let mut tasks = self.tasks();
        if tasks.started {
            return;
        }
        // close() marks the worker Closed before it takes the task lock
        if self.shared.dispatch().state == WorkerState::Closed {
            return;
        }
        tasks.started = true;

        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        tasks.ack_tx = Some(ack_tx);
        tasks.ack_dispatcher = Some(tokio::spawn(run_ack_dispatcher(
            Arc::clone(&self.shared),
            ack_rx,
        )));
        tasks.fetcher = Some(tokio::spawn(run_fetcher(
            Arc::clone(&self.shared),
            tasks.fetch_token.clone(),
        )));
    }
}

#[async_trait]
impl ConsumerWorker for Worker {
    fn consumer_info(&self) -> &ConsumerInfo {
        &self.shared.info
    }

    fn state(&self) -> WorkerState {
        self.shared.dispatch().state
    }

    fn attach_channel(&self, channel: Arc<dyn Channel>, parallelism: usize) -> bool {
        let parallelism = parallelism.clamp(1, self.shared.config.max_channel_parallelism.max(1));
        let channel_id = channel.id();
        let remote = channel.remote_addr();

        let attached = {
            let mut dispatch = self.shared.dispatch();
            match dispatch.state {
                WorkerState::Draining | WorkerState::Closed => None,
                WorkerState::Attaching | WorkerState::Active => {
                    dispatch
                        .channels
                        .entry(channel_id)
                        .and_modify(|slot| slot.parallelism = parallelism)
                        .or_insert_with(|| ChannelSlot {
                            channel,
                            parallelism,
                            in_flight: BTreeMap::new(),
                        });
                    Some(dispatch.channels.len())
                }
            }
        };

        let Some(connected) = attached else {
            debug!(consumer = %self.shared.info.consumer_id, channel = %channel_id, "attach refused, worker is shutting down");
            return false;
        };

        info!(
            consumer = %self.shared.info.consumer_id,
            channel = %channel_id,
            remote = %remote,
            parallelism,
            connected,
            "channel attached"
        );
        self.start_tasks();
        self.shared.wake.notify_one();
        true
    }

    fn detach_channel(&self, channel_id: ChannelId) {
        self.shared.detach(channel_id, "disconnected");
    }

    fn handle_ack(&self, channel_id: ChannelId, message_id: MessageId, kind: AckKind) {
        let previous = self
            .shared
            .max_acked
            .fetch_max(message_id.value(), Ordering::AcqRel);
        if message_id.value() <= previous {
            debug!(
                consumer = %self.shared.info.consumer_id,
                message_id = %message_id,
                watermark = previous,
                "ack at or below watermark"
            );
        }

        let ack_tx = self.tasks().ack_tx.clone();
        let event = AckEvent {
            channel_id,
            message_id,
            kind,
        };
        match ack_tx {
            Some(ack_tx) => {
                if ack_tx.send(event).is_err() {
                    debug!(consumer = %self.shared.info.consumer_id, "ack dispatcher gone");
                }
            }
            None => {
                debug!(consumer = %self.shared.info.consumer_id, "ack dispatch stopped, watermark only");
            }
        }
    }

    fn all_channels_disconnected(&self) -> bool {
        let mut dispatch = self.shared.dispatch();
        let gone = dispatch.prune_disconnected();
        let idle = dispatch.channels.is_empty();
        drop(dispatch);
        if !gone.is_empty() {
            self.shared.log_pruned(&gone);
            self.shared.wake.notify_one();
        }
        idle
    }

    fn begin_draining_if_idle(&self) -> bool {
        let mut dispatch = self.shared.dispatch();
        let gone = dispatch.prune_disconnected();
        self.shared.log_pruned(&gone);
        let idle = dispatch.channels.is_empty()
            && matches!(dispatch.state, WorkerState::Attaching | WorkerState::Active);
        if idle {
            dispatch.state = WorkerState::Draining;
        }
        idle
    }

    fn max_acked_message_id(&self) -> MessageId {
        MessageId::new(self.shared.max_acked.load(Ordering::Acquire))
    }

    async fn stop_fetching(&self) {
        {
            let mut dispatch = self.shared.dispatch();
            if dispatch.state != WorkerState::Closed {
                dispatch.state = WorkerState::Draining;
            }
        }

        let fetcher = {
            let mut tasks = self.tasks();
            tasks.fetch_token.cancel();
            tasks.fetcher.take()
        };
        if let Some(fetcher) = fetcher {
            if let Err(err) = fetcher.await {
                warn!(consumer = %self.shared.info.consumer_id, error = %err, "fetcher ended abnormally");
            }
        }
    }

    async fn stop_ack_dispatch(&self) {
        let dispatcher = {
            let mut tasks = self.tasks();
            tasks.ack_tx.take();
            tasks.ack_dispatcher.take()
        };
        if let Some(dispatcher) = dispatcher {
            if let Err(err) = dispatcher.await {
                warn!(consumer = %self.shared.info.consumer_id, error = %err, "ack dispatcher ended abnormally");
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let channels: Vec<Arc<dyn Channel>> = {
            let mut dispatch = self.shared.dispatch();
            dispatch.state = WorkerState::Closed;
            dispatch.pending.clear();
            dispatch.channels.drain().map(|(_, slot)| slot.channel).collect()
        };

        {
            let mut tasks = self.tasks();
            tasks.fetch_token.cancel();
            tasks.ack_tx.take();
            if let Some(fetcher) = tasks.fetcher.take() {
                fetcher.abort();
            }
            if let Some(dispatcher) = tasks.ack_dispatcher.take() {
                dispatcher.abort();
            }
        }

        let mut first_error = None;
        for channel in channels {
            if let Err(err) = channel.close().await {
                warn!(
                    consumer = %self.shared.info.consumer_id,
                    channel = %channel.id(),
                    error = %err,
                    "failed to close channel"
                );
                first_error.get_or_insert(err);
            }
        }

        info!(consumer = %self.shared.info.consumer_id, "worker closed");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyStore;

    #[async_trait]
    impl AckStore for EmptyStore {
        async fn get_max_message_id(&self, _topic: &str, _consumer: &str) -> Result<Option<MessageId>> {
            Ok(None)
        }

        async fn add(&self, _topic: &str, _consumer: &str, _message_id: MessageId, _source: &str) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl MessageSource for EmptyStore {
        async fn fetch_after(
            &self,
            _topic: &str,
            _consumer: &str,
            _after: MessageId,
            _filter: &MessageFilter,
            _limit: i64,
        ) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn latest_message_id(&self, _topic: &str) -> Result<Option<MessageId>> {
            Ok(None)
        }
    }

    fn worker() -> Worker {
        Worker::new(
            ConsumerInfo::durable("orders", "billing"),
            MessageFilter::All,
            ServerConfig::default(),
            Arc::new(EmptyStore),
            Arc::new(EmptyStore),
        )
    }

    #[tokio::test]
    async fn test_tasks_not_started_after_close() {
        let worker = worker();
        worker.close().await.unwrap();

        // An attach that passed its state check before close() lands here
        worker.start_tasks();

        let tasks = worker.tasks();
        assert!(!tasks.started);
        assert!(tasks.fetcher.is_none());
        assert!(tasks.ack_dispatcher.is_none());
        assert!(tasks.ack_tx.is_none());
    }

    #[tokio::test]
    async fn test_close_stops_started_tasks() {
        let worker = worker();
        worker.start_tasks();
        assert!(worker.tasks().fetcher.is_some());

        worker.close().await.unwrap();

        let tasks = worker.tasks();
        assert!(tasks.fetcher.is_none());
        assert!(tasks.ack_dispatcher.is_none());
        assert!(tasks.fetch_token.is_cancelled());
    }
}
