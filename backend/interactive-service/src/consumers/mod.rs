//! Read-event consumers
//!
//! Both consumers subscribe to the article read topic and turn each read into
//! a counter increment. Delivery is at-least-once: there is no deduplication,
//! so a redelivered event is counted again.

pub mod batch_read_events;
pub mod read_events;

use crate::error::ConsumerError;
use crate::metrics::ConsumerMetrics;
use crate::repository::InteractiveRepository;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use batch_read_events::{BatchReadEventConsumer, BatchReadEventHandler, PendingBatch};
pub use read_events::{ReadEventConsumer, ReadEventHandler};

/// Topic carrying article read events
pub const TOPIC_READ_EVENT: &str = "article_read";

/// Biz type every read event is counted against
pub const READ_EVENT_BIZ: &str = "article";

/// Upper bound for applying one message (or one batch)
pub const HANDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Payload of a read event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadEvent {
    pub item_id: i64,
    pub user_id: i64,
}

/// Lifecycle of a consumer, observable through a `watch` channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Subscribed,
}

/// Configuration for the read event Kafka consumers
#[derive(Debug, Clone)]
pub struct ReadEventConsumerConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    /// 0 selects the per-message consumer; anything else the batch consumer
    pub batch_size: usize,
    pub batch_window: Duration,
}

impl ReadEventConsumerConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: "interactive".to_string(),
            topic: TOPIC_READ_EVENT.to_string(),
            batch_size: 0,
            batch_window: Duration::from_secs(1),
        }
    }

    /// Load configuration from environment variables.
    /// Returns None when `KAFKA_BROKERS` is unset or blank.
    pub fn from_env() -> Option<Self> {
        let brokers = std::env::var("KAFKA_BROKERS").ok()?;

        if brokers.trim().is_empty() {
            return None;
        }

        let mut config = Self::new(brokers);
        if let Ok(group_id) = std::env::var("KAFKA_READ_EVENT_GROUP_ID") {
            config.group_id = group_id;
        }
        if let Ok(topic) = std::env::var("KAFKA_READ_EVENT_TOPIC") {
            config.topic = topic;
        }
        config.batch_size = std::env::var("READ_EVENT_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        // tokio's interval panics on a zero period
        config.batch_window = std::env::var("READ_EVENT_BATCH_WINDOW_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(config.batch_window);

        Some(config)
    }
}

/// Start the consumer selected by `config.batch_size`.
///
/// A consumer that cannot start is logged and `None` is returned; the caller
/// keeps serving without it.
pub fn start_read_event_consumer(
    repo: Arc<dyn InteractiveRepository>,
    metrics: ConsumerMetrics,
    config: ReadEventConsumerConfig,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let batch_size = config.batch_size;
    let started = if batch_size > 0 {
        BatchReadEventConsumer::new(repo, metrics, config).start(shutdown)
    } else {
        ReadEventConsumer::new(repo, metrics, config).start(shutdown)
    };
    started_or_none(batch_size, started)
}

fn started_or_none(
    batch_size: usize,
    started: Result<JoinHandle<()>, ConsumerError>,
) -> Option<JoinHandle<()>> {
    match started {
        Ok(handle) => {
            info!(batch_size, "Read event consumer started");
            Some(handle)
        }
        Err(e) => {
            error!(error = %e, "Failed to start read event consumer, continuing without it");
            None
        }
    }
}

/// Create a manually-committing consumer subscribed to the read topic
pub(crate) fn subscribe(config: &ReadEventConsumerConfig) -> KafkaResult<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "latest")
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "45000")
        .set("max.poll.interval.ms", "300000")
        .create()?;

    consumer.subscribe(&[&config.topic])?;
    Ok(consumer)
}

/// Errors after which the consumer cannot make progress and stops
pub(crate) fn is_fatal(err: &KafkaError) -> bool {
    match err {
        KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => true,
        _ => matches!(
            err.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::Fatal
                    | RDKafkaErrorCode::Authentication
                    | RDKafkaErrorCode::TopicAuthorizationFailed
                    | RDKafkaErrorCode::GroupAuthorizationFailed
            )
        ),
    }
}
