//! Sink trait shared by every metric destination.

use std::collections::BTreeMap;
use std::io;

use thiserror::Error;

use super::record::MetricRecord;

/// Sink write or flush failure. Isolated per sink by the logger.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sink '{0}' is full")]
    Full(String),

    #[error("sink '{0}' is disconnected")]
    Disconnected(String),

    #[error("invalid sink pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A named destination for metric records.
///
/// `write` receives one publish batch (already filtered by the route's
/// pattern). `flush` must leave every previously written record durably
/// stored and must be idempotent.
pub trait Sink: Send {
    fn name(&self) -> &str;

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        (**self).write(batch)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Group a batch by step, preserving publish order inside each step.
pub fn group_by_step(batch: &[MetricRecord]) -> BTreeMap<u64, Vec<&MetricRecord>> {
    let mut groups: BTreeMap<u64, Vec<&MetricRecord>> = BTreeMap::new();
    for record in batch {
        groups.entry(record.step).or_default().push(record);
    }
    groups
}
