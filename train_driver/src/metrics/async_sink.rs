//! Background-thread wrapper for slow sinks.

use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

use super::record::MetricRecord;
use super::sink::{Sink, SinkError};

enum Message {
    Write(Vec<MetricRecord>),
    Flush(Sender<Result<(), SinkError>>),
    End,
}

/// Runs the wrapped sink on its own thread so `write` returns as soon as
/// the batch is queued.
///
/// A write failure on the background thread is stored and returned by the
/// next `write` or `flush` call, so the logger still attributes it to this
/// sink. `flush` waits for every queued batch to be written and flushed.
pub struct AsyncSink {
    name: String,
    sender: Sender<Message>,
    failure: Arc<Mutex<Option<SinkError>>>,
    handler: Option<JoinHandle<()>>,
}

impl AsyncSink {
    pub fn new<S: Sink + 'static>(mut sink: S) -> Result<Self, SinkError> {
        let name = sink.name().to_string();
        let (sender, receiver) = unbounded::<Message>();
        let failure = Arc::new(Mutex::new(None));
        let thread_failure = Arc::clone(&failure);

        let handler = std::thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || {
                for message in receiver.iter() {
                    match message {
                        Message::Write(batch) => {
                            if let Err(e) = sink.write(&batch) {
                                thread_failure.lock().get_or_insert(e);
                            }
                        }
                        Message::Flush(ack) => {
                            let pending = thread_failure.lock().take();
                            let result = match pending {
                                Some(e) => Err(e),
                                None => sink.flush(),
                            };
                            let _ = ack.send(result);
                        }
                        Message::End => {
                            let _ = sink.flush();
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            name,
            sender,
            failure,
            handler: Some(handler),
        })
    }

    fn take_failure(&self) -> Result<(), SinkError> {
        match self.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Sink for AsyncSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        self.take_failure()?;
        self.sender
            .send(Message::Write(batch.to_vec()))
            .map_err(|_| SinkError::Disconnected(self.name.clone()))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.sender
            .send(Message::Flush(ack_tx))
            .map_err(|_| SinkError::Disconnected(self.name.clone()))?;
        ack_rx
            .recv()
            .map_err(|_| SinkError::Disconnected(self.name.clone()))?
    }
}

impl Drop for AsyncSink {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::End);
        if let Some(handler) = self.handler.take() {
            let _ = handler.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::channel_sink::ChannelSink;

    struct FailingSink;

    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn write(&mut self, _batch: &[MetricRecord]) -> Result<(), SinkError> {
            Err(SinkError::Full("failing".into()))
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_async_sink_flush_waits_for_writes() {
        let (inner, rx) = ChannelSink::bounded("dashboard", 16);
        let mut sink = AsyncSink::new(inner).unwrap();
        assert_eq!(sink.name(), "dashboard");

        for step in 0..5 {
            sink.write(&[MetricRecord::new(step, "train", "loss", 0.1)]).unwrap();
        }
        sink.flush().unwrap();

        assert_eq!(rx.len(), 5);
        let steps: Vec<u64> = rx.try_iter().map(|b| b[0].step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_async_sink_surfaces_background_failure_on_flush() {
        let mut sink = AsyncSink::new(FailingSink).unwrap();
        sink.write(&[MetricRecord::new(1, "a", "b", 1.0)]).unwrap();
        assert!(sink.flush().is_err());
        // The failure is reported once.
        assert!(sink.flush().is_ok());
    }
}
