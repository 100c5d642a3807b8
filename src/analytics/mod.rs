//! Impression reporting.
//!
//! Every served flag value with a bound experiment produces an [`ImpressionEvent`]. The event is
//! passed synchronously to the configured [`ImpressionHandler`], and then handed to the
//! [`ClientProxy`], which batches events on a background thread and delivers them to an
//! [`ImpressionSink`]. Delivery is at-most-once.
use std::time::Duration;

mod event;
mod reporter;
mod sink;

pub use event::{ImpressionEvent, ImpressionExperiment, ImpressionHandler};
pub(crate) use event::NoopImpressionHandler;
pub use reporter::ClientProxy;
pub use sink::{HttpImpressionSink, ImpressionSink};

/// Configuration of impression delivery.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Where batches are posted.
    pub ingestion_url: String,
    /// Key authorizing the writes.
    pub write_key: String,
    /// Maximum events per batch.
    pub batch_size: usize,
    /// Maximum time an event waits in a partial batch.
    pub flush_interval: Duration,
    /// Events buffered between evaluating threads and the worker. Excess events are dropped.
    pub buffer_size: usize,
}

const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 10_000;
pub(crate) const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);
pub(crate) const MIN_BUFFER_SIZE: usize = 1;

impl AnalyticsConfig {
    /// Default value for [`AnalyticsConfig::batch_size`].
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    /// Default value for [`AnalyticsConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`AnalyticsConfig::buffer_size`].
    pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

    /// Deliver to `ingestion_url` using `write_key`, with default batching.
    pub fn new(ingestion_url: impl Into<String>, write_key: impl Into<String>) -> AnalyticsConfig {
        AnalyticsConfig {
            ingestion_url: ingestion_url.into(),
            write_key: write_key.into(),
            batch_size: AnalyticsConfig::DEFAULT_BATCH_SIZE,
            flush_interval: AnalyticsConfig::DEFAULT_FLUSH_INTERVAL,
            buffer_size: AnalyticsConfig::DEFAULT_BUFFER_SIZE,
        }
    }

    /// Update batch size with `batch_size`, clamped to `1..=10000`.
    pub fn with_batch_size(mut self, batch_size: usize) -> AnalyticsConfig {
        self.batch_size = batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self
    }

    /// Update flush interval with `flush_interval`, raised to at least 10ms.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> AnalyticsConfig {
        self.flush_interval = flush_interval.max(MIN_FLUSH_INTERVAL);
        self
    }

    /// Update buffer size with `buffer_size`, raised to at least 1.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> AnalyticsConfig {
        self.buffer_size = buffer_size.max(MIN_BUFFER_SIZE);
        self
    }
}
