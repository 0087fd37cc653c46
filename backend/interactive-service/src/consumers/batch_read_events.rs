//! Batched read event consumer
//!
//! Accumulates decoded events and applies them with a single
//! `batch_incr_read_cnt` once the batch is full or the flush window elapses.
//! Offsets are committed for the whole consumer only after a successful flush.

use super::{
    is_fatal, subscribe, ConsumerState, ReadEvent, ReadEventConsumerConfig, HANDLE_TIMEOUT,
    READ_EVENT_BIZ,
};
use crate::domain::models::BizKey;
use crate::error::ConsumerError;
use crate::metrics::ConsumerMetrics;
use crate::repository::InteractiveRepository;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Applies a batch of read events in one store transaction
#[derive(Clone)]
pub struct BatchReadEventHandler {
    repo: Arc<dyn InteractiveRepository>,
    metrics: ConsumerMetrics,
    timeout: Duration,
}

impl BatchReadEventHandler {
    pub fn new(repo: Arc<dyn InteractiveRepository>, metrics: ConsumerMetrics) -> Self {
        Self {
            repo,
            metrics,
            timeout: HANDLE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Decode a raw payload, for callers that buffer before applying
    pub fn decode(payload: Option<&[u8]>) -> Result<ReadEvent, ConsumerError> {
        let data = payload.ok_or(ConsumerError::EmptyPayload)?;
        Ok(serde_json::from_slice(data)?)
    }

    /// Apply `events` atomically. One observation is recorded per batch.
    pub async fn handle_batch(&self, topic: &str, events: &[ReadEvent]) -> Result<(), ConsumerError> {
        if events.is_empty() {
            return Ok(());
        }

        let keys: Vec<BizKey> = events
            .iter()
            .map(|event| BizKey::new(READ_EVENT_BIZ, event.item_id))
            .collect();

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.repo.batch_incr_read_cnt(&keys)).await;
        self.metrics.observe_consume(topic, start.elapsed());

        match result {
            Ok(outcome) => outcome.map_err(ConsumerError::from),
            Err(_) => Err(ConsumerError::Timeout(self.timeout)),
        }
    }

    /// Apply and empty `batch`. Returns whether the consumed offsets may be
    /// committed; a failed batch is dropped and must stay uncommitted.
    pub async fn flush(&self, topic: &str, batch: &mut PendingBatch) -> bool {
        let events = batch.take();
        match self.handle_batch(topic, &events).await {
            Ok(()) => {
                debug!(size = events.len(), "Read event batch applied");
                true
            }
            Err(e) => {
                warn!(
                    size = events.len(),
                    error = %e,
                    "Failed to apply read event batch, offsets left uncommitted"
                );
                false
            }
        }
    }
}

const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Events buffered between flushes.
///
/// A flush is due once `max_size` events are held or the window elapses,
/// whichever comes first. Taking the events restarts the window.
pub struct PendingBatch {
    events: Vec<ReadEvent>,
    max_size: usize,
    window: Interval,
}

impl PendingBatch {
    pub fn new(max_size: usize, window: Duration) -> Self {
        let max_size = max_size.max(1);
        let window = window.max(MIN_WINDOW);
        let mut window = interval_at(Instant::now() + window, window);
        window.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            events: Vec::with_capacity(max_size),
            max_size,
            window,
        }
    }

    pub fn push(&mut self, event: ReadEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.max_size
    }

    pub fn take(&mut self) -> Vec<ReadEvent> {
        self.window.reset();
        std::mem::replace(&mut self.events, Vec::with_capacity(self.max_size))
    }

    /// Resolves when the flush window elapses
    pub async fn window_elapsed(&mut self) {
        self.window.tick().await;
    }
}

pub struct BatchReadEventConsumer {
    handler: BatchReadEventHandler,
    config: ReadEventConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl BatchReadEventConsumer {
    pub fn new(
        repo: Arc<dyn InteractiveRepository>,
        metrics: ConsumerMetrics,
        config: ReadEventConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            handler: BatchReadEventHandler::new(repo, metrics),
            config,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Subscribe and start consuming in a background task.
    ///
    /// Same lifecycle as the per-message consumer. Events still buffered at
    /// shutdown are not flushed; their offsets were never committed.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>, ConsumerError> {
        let consumer = subscribe(&self.config)?;

        info!(
            topic = %self.config.topic,
            group = %self.config.group_id,
            batch_size = self.batch_size(),
            "Batch read event consumer subscribed"
        );
        self.state.send_replace(ConsumerState::Subscribed);

        Ok(tokio::spawn(self.run(consumer, shutdown)))
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    async fn run(self, consumer: StreamConsumer, mut shutdown: watch::Receiver<bool>) {
        let mut batch = PendingBatch::new(self.batch_size(), self.config.batch_window);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(pending = batch.len(), "Batch read event consumer shutting down");
                    break;
                }
                message = consumer.recv() => match message {
                    Ok(record) => {
                        match BatchReadEventHandler::decode(record.payload()) {
                            Ok(event) => batch.push(event),
                            Err(e) => warn!(
                                partition = record.partition(),
                                offset = record.offset(),
                                error = %e,
                                "Skipping undecodable read event"
                            ),
                        }

                        if batch.is_full() {
                            self.flush(&consumer, &mut batch).await;
                        }
                    }
                    Err(e) if is_fatal(&e) => {
                        error!(error = %e, "Batch read event consumer stopped on fatal Kafka error");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Kafka error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = batch.window_elapsed() => {
                    if !batch.is_empty() {
                        self.flush(&consumer, &mut batch).await;
                    }
                }
            }
        }

        self.state.send_replace(ConsumerState::Stopped);
    }

    async fn flush(&self, consumer: &StreamConsumer, batch: &mut PendingBatch) {
        if self.handler.flush(&self.config.topic, batch).await {
            if let Err(e) = consumer.commit_consumer_state(CommitMode::Async) {
                warn!(error = %e, "Failed to commit Kafka offsets");
            }
        }
    }
}
