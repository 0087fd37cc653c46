//! Consumer metrics
//!
//! Built once by the caller against an explicit registry and handed to the
//! consumers; nothing here touches the process-wide default registry.

use prometheus::{HistogramOpts, HistogramVec, Registry};
use std::time::Duration;

#[derive(Clone)]
pub struct ConsumerMetrics {
    consume_duration: HistogramVec,
}

impl ConsumerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let consume_duration = HistogramVec::new(
            HistogramOpts::new(
                "interactive_read_event_consume_seconds",
                "Time spent applying a consumed read event (or batch) to the counters",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0, 60.0,
            ]),
            &["topic"],
        )?;

        registry.register(Box::new(consume_duration.clone()))?;

        Ok(Self { consume_duration })
    }

    pub fn observe_consume(&self, topic: &str, elapsed: Duration) {
        self.consume_duration
            .with_label_values(&[topic])
            .observe(elapsed.as_secs_f64());
    }

    /// Number of observations recorded for `topic`
    pub fn consume_count(&self, topic: &str) -> u64 {
        self.consume_duration
            .with_label_values(&[topic])
            .get_sample_count()
    }
}
