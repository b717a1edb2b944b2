//! Behavioural tests for the runners module.
//!
//! # Test Organization
//!
//! - `run_loop_tests`: chunk sizing, step exactness, firing order, failure handling
//! - `training_runner_tests`: single-process driver wiring and JSONL output
//! - `parallel_runner_tests`: actor/learner threads over the transition queue
//!
//! # Invariants Tested
//!
//! 1. **Step exactness**: a step trigger fires at every multiple of its
//!    interval, whatever the chunk and stride sizes.
//! 2. **Counter ownership**: the counter equals the steps executed, also
//!    after cancellation mid-chunk.
//! 3. **Non-fatal callbacks**: callback errors and panics become incidents.
//! 4. **Clean shutdown**: either parallel unit exiting lets the other finish.
//! 5. **Flush on exit**: sinks are flushed when a run is cancelled or its
//!    step function fails.

mod parallel_runner_tests;

use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::incident::{incidents, Incidents};
use crate::metrics::{ChannelSink, Logger, MetricRecord, SharedLogger, Sink, SinkError};

/// Logger forwarding every record to an in-memory channel.
pub(super) fn channel_logger() -> (SharedLogger, Receiver<Vec<MetricRecord>>, Arc<Incidents>) {
    let incidents = incidents();
    let (sink, rx) = ChannelSink::bounded("memory", 4096);
    let logger = Logger::builder()
        .all(sink)
        .incidents(Arc::clone(&incidents))
        .build()
        .unwrap();
    (Arc::new(logger), rx, incidents)
}

/// Every record received so far, in publish order.
pub(super) fn received(rx: &Receiver<Vec<MetricRecord>>) -> Vec<MetricRecord> {
    rx.try_iter().flatten().collect()
}

/// What a [`BufferedSink`] has seen.
#[derive(Debug, Default)]
pub(super) struct Buffer {
    /// Written but not yet flushed.
    pub pending: Vec<MetricRecord>,
    /// Made durable by a flush, in write order.
    pub flushed: Vec<MetricRecord>,
    pub flushes: usize,
}

/// Sink holding records back until `flush`, like a buffered file.
struct BufferedSink(Arc<Mutex<Buffer>>);

impl Sink for BufferedSink {
    fn name(&self) -> &str {
        "buffered"
    }

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        self.0.lock().pending.extend_from_slice(batch);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let mut buffer = self.0.lock();
        let pending = std::mem::take(&mut buffer.pending);
        buffer.flushed.extend(pending);
        buffer.flushes += 1;
        Ok(())
    }
}

/// Logger over a [`BufferedSink`].
///
/// Keep the returned logger alive until the assertions: dropping the last
/// handle flushes it.
pub(super) fn buffered_logger() -> (SharedLogger, Arc<Mutex<Buffer>>) {
    let buffer = Arc::new(Mutex::new(Buffer::default()));
    let logger = Logger::builder()
        .all(BufferedSink(Arc::clone(&buffer)))
        .build()
        .unwrap();
    (Arc::new(logger), buffer)
}

/// Steps of the flushed records with this full key.
pub(super) fn flushed_steps(buffer: &Mutex<Buffer>, key: &str) -> Vec<u64> {
    buffer
        .lock()
        .flushed
        .iter()
        .filter(|r| r.full_key() == key)
        .map(|r| r.step)
        .collect()
}
