//! Per-message read event consumer
//!
//! Each message becomes one `incr_read_cnt("article", item_id)` bounded by a
//! one-minute deadline. Offsets are committed only after a message was
//! applied; a failed message is logged and left uncommitted for the broker's
//! redelivery policy. There is no internal retry.

use super::{
    is_fatal, subscribe, ConsumerState, ReadEvent, ReadEventConsumerConfig, HANDLE_TIMEOUT,
    READ_EVENT_BIZ,
};
use crate::error::ConsumerError;
use crate::metrics::ConsumerMetrics;
use crate::repository::InteractiveRepository;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Applies a single read event to the counters
#[derive(Clone)]
pub struct ReadEventHandler {
    repo: Arc<dyn InteractiveRepository>,
    metrics: ConsumerMetrics,
    timeout: Duration,
}

impl ReadEventHandler {
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

    /// Decode and apply one message. The elapsed time of the increment is
    /// recorded under `topic` whether it succeeds or not.
    pub async fn handle(&self, topic: &str, payload: Option<&[u8]>) -> Result<(), ConsumerError> {
        let data = payload.ok_or(ConsumerError::EmptyPayload)?;
        let event: ReadEvent = serde_json::from_slice(data)?;

        let start = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.repo.incr_read_cnt(READ_EVENT_BIZ, event.item_id),
        )
        .await;
        self.metrics.observe_consume(topic, start.elapsed());

        match result {
            Ok(outcome) => outcome.map_err(ConsumerError::from),
            Err(_) => Err(ConsumerError::Timeout(self.timeout)),
        }
    }
}

pub struct ReadEventConsumer {
    handler: ReadEventHandler,
    config: ReadEventConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl ReadEventConsumer {
    pub fn new(
        repo: Arc<dyn InteractiveRepository>,
        metrics: ConsumerMetrics,
        config: ReadEventConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            handler: ReadEventHandler::new(repo, metrics),
            config,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Subscribe and start consuming in a background task.
    ///
    /// A client creation or subscribe failure is returned here and the
    /// consumer stays `Stopped`. The task runs until `shutdown` flips or the
    /// stream reports a fatal error.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>, ConsumerError> {
        let consumer = subscribe(&self.config)?;

        info!(
            topic = %self.config.topic,
            group = %self.config.group_id,
            "Read event consumer subscribed"
        );
        self.state.send_replace(ConsumerState::Subscribed);

        Ok(tokio::spawn(self.run(consumer, shutdown)))
    }

    async fn run(self, consumer: StreamConsumer, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Read event consumer shutting down");
                    break;
                }
                message = consumer.recv() => match message {
                    Ok(record) => {
                        match self.handler.handle(record.topic(), record.payload()).await {
                            Ok(()) => {
                                debug!(
                                    partition = record.partition(),
                                    offset = record.offset(),
                                    "Read event applied"
                                );
                                if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                                    warn!(error = %e, "Failed to commit Kafka offset");
                                }
                            }
                            Err(e) => {
                                warn!(
                                    topic = record.topic(),
                                    partition = record.partition(),
                                    offset = record.offset(),
                                    error = %e,
                                    "Failed to handle read event, offset left uncommitted"
                                );
                            }
                        }
                    }
                    Err(e) if is_fatal(&e) => {
                        error!(error = %e, "Read event consumer stopped on fatal Kafka error");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Kafka error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        self.state.send_replace(ConsumerState::Stopped);
    }
}
