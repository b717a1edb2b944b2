//! Metric records, accumulation and sink routing.
//!
//! ## Records
//!
//! - [`MetricRecord`]: one `(namespace/key, value, step)` sample
//! - [`TrainingMetrics`]: accumulator drained at each log firing
//!
//! ## Sinks
//!
//! - [`JsonlSink`]: append-only line-delimited JSON file
//! - [`TerminalSink`]: console line per step
//! - [`ChannelSink`]: bounded channel to an external consumer
//! - [`AsyncSink`]: moves any sink onto a background thread
//!
//! [`Logger`] multiplexes records to sinks by regex over the full key.

pub mod async_sink;
pub mod channel_sink;
pub mod jsonl;
pub mod logger;
pub mod record;
pub mod sink;
pub mod terminal;
pub mod training_metrics;

#[cfg(test)]
mod tests;

pub use async_sink::AsyncSink;
pub use channel_sink::ChannelSink;
pub use jsonl::JsonlSink;
pub use logger::{
    Logger, LoggerBuilder, SharedLogger, DEFAULT_SCORE_PATTERN, METRICS_FILE, SCORES_FILE,
};
pub use record::{ImagePayload, MetricRecord, MetricValue};
pub use sink::{Sink, SinkError};
pub use terminal::TerminalSink;
pub use training_metrics::{training_metrics, Agg, SharedTrainingMetrics, TrainingMetrics};
