//! Human-readable console sink.

use std::io::{self, Write};

use super::record::{MetricRecord, MetricValue};
use super::sink::{group_by_step, Sink, SinkError};

/// Prints one line per step of each batch:
///
/// ```text
/// [   12500] episode/score 312.0000 / episode/length 500.0000
/// ```
pub struct TerminalSink<W: Write + Send = io::Stdout> {
    name: String,
    out: W,
}

impl TerminalSink<io::Stdout> {
    /// Console sink on stdout.
    pub fn stdout() -> Self {
        Self::new("terminal", io::stdout())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(name: impl Into<String>, out: W) -> Self {
        Self {
            name: name.into(),
            out,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn format_value(value: &MetricValue) -> String {
        match value {
            MetricValue::Scalar(v) => format!("{v:.4}"),
            MetricValue::Array(values) => format!("[{} values]", values.len()),
            MetricValue::Image(image) => format!("<image {}x{}>", image.width, image.height),
        }
    }
}

impl<W: Write + Send> Sink for TerminalSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        for (step, records) in group_by_step(batch) {
            let fields: Vec<String> = records
                .iter()
                .map(|r| format!("{} {}", r.full_key(), Self::format_value(&r.value)))
                .collect();
            writeln!(self.out, "[{:>8}] {}", step, fields.join(" / "))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}
