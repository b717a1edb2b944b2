//! Sink forwarding batches to an external consumer (e.g. a telemetry dashboard).

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::record::MetricRecord;
use super::sink::{Sink, SinkError};

/// Forwards each publish batch over a bounded channel.
///
/// The sink never blocks the publisher: a full channel or a dropped
/// receiver is reported as a sink failure and the batch is lost for this
/// sink only.
pub struct ChannelSink {
    name: String,
    tx: Sender<Vec<MetricRecord>>,
}

impl ChannelSink {
    /// Create a sink and the receiving end handed to the consumer.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> (Self, Receiver<Vec<MetricRecord>>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        match self.tx.try_send(batch.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full(self.name.clone())),
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Disconnected(self.name.clone())),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
