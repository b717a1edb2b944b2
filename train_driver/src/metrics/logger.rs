//! Metric sink multiplexer.
//!
//! A [`Logger`] owns a list of routes. Each route pairs a regex over the
//! fully-qualified key (`namespace/key`) with a [`Sink`]. A published record
//! reaches every route whose pattern matches it, and a failing sink never
//! affects delivery to the others.
//!
//! ```ignore
//! let logger = Logger::builder()
//!     .all(JsonlSink::open("metrics", dir.join("metrics.jsonl"))?)
//!     .sink("episode/score$", JsonlSink::open("scores", dir.join("scores.jsonl"))?)
//!     .build()?;
//! logger.publish(MetricRecord::new(10, "episode", "score", 1.0));
//! logger.flush();
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::incident::{incidents, Incident, IncidentKind, Incidents};

use super::jsonl::JsonlSink;
use super::record::{MetricRecord, MetricValue};
use super::sink::{Sink, SinkError};
use super::terminal::TerminalSink;

/// File name of the unfiltered metric stream.
pub const METRICS_FILE: &str = "metrics.jsonl";
/// File name of the score-filtered metric stream.
pub const SCORES_FILE: &str = "scores.jsonl";
/// Pattern matching any namespace ending in `episode` with key `score`.
pub const DEFAULT_SCORE_PATTERN: &str = "episode/score$";

struct Route {
    pattern: Regex,
    sink: Box<dyn Sink>,
    /// Consecutive failed writes or flushes.
    failures: u64,
}

impl Route {
    fn fail(&mut self, incidents: &Incidents, step: u64, error: &SinkError) {
        self.failures += 1;
        incidents.report(
            Incident::new(IncidentKind::Sink, self.sink.name(), step, error.to_string())
                .with_repeat(self.failures),
        );
    }
}

/// Fan-out of metric records to pattern-filtered sinks.
///
/// `Logger` is `Send + Sync`; each route is locked independently so a slow
/// sink only delays publishers on that route.
pub struct Logger {
    routes: Vec<Mutex<Route>>,
    incidents: Arc<Incidents>,
}

/// Logger shared between the run loop, callbacks and parallel units.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::default()
    }

    /// The two persisted streams under `logdir` plus a terminal echo of scores.
    ///
    /// - `metrics.jsonl`: every record.
    /// - `scores.jsonl`: records whose key matches `score_pattern`.
    pub fn standard(
        logdir: impl AsRef<Path>,
        score_pattern: &str,
        incidents: Arc<Incidents>,
    ) -> Result<Self, SinkError> {
        let logdir = logdir.as_ref();
        Self::builder()
            .all(JsonlSink::open("metrics", logdir.join(METRICS_FILE))?)
            .sink(score_pattern, JsonlSink::open("scores", logdir.join(SCORES_FILE))?)
            .sink(score_pattern, TerminalSink::stdout())
            .incidents(incidents)
            .build()
    }

    /// Route one record.
    pub fn publish(&self, record: MetricRecord) {
        self.publish_batch(std::slice::from_ref(&record));
    }

    /// Route several records published together.
    ///
    /// Each sink receives the matching subset as one batch, so file sinks
    /// write a single line per step of the batch.
    pub fn publish_batch(&self, records: &[MetricRecord]) {
        if records.is_empty() {
            return;
        }
        let keys: Vec<String> = records.iter().map(MetricRecord::full_key).collect();
        for route in &self.routes {
            let mut route = route.lock();
            let selected: Vec<MetricRecord> = records
                .iter()
                .zip(&keys)
                .filter(|(_, key)| route.pattern.is_match(key))
                .map(|(record, _)| record.clone())
                .collect();
            if selected.is_empty() {
                continue;
            }
            match route.sink.write(&selected) {
                Ok(()) => route.failures = 0,
                Err(e) => {
                    let step = selected.iter().map(|r| r.step).max().unwrap_or_default();
                    route.fail(&self.incidents, step, &e);
                }
            }
        }
    }

    /// Publish `(key, value)` pairs under one namespace at `step`.
    pub fn add<I, K, V>(&self, step: u64, namespace: &str, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetricValue>,
    {
        let batch: Vec<MetricRecord> = values
            .into_iter()
            .map(|(key, value)| MetricRecord::new(step, namespace, key, value))
            .collect();
        self.publish_batch(&batch);
    }

    /// Flush every sink. Returns the number of sinks that failed to flush.
    ///
    /// Flushing twice writes nothing new the second time.
    pub fn flush(&self) -> usize {
        let mut failed = 0;
        for route in &self.routes {
            let mut route = route.lock();
            match route.sink.flush() {
                Ok(()) => route.failures = 0,
                Err(e) => {
                    failed += 1;
                    route.fail(&self.incidents, 0, &e);
                }
            }
        }
        failed
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|route| route.lock().sink.name().to_string())
            .collect()
    }

    pub fn incidents(&self) -> &Arc<Incidents> {
        &self.incidents
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Builder for [`Logger`]. Patterns are compiled in `build`.
#[derive(Default)]
pub struct LoggerBuilder {
    routes: Vec<(String, Box<dyn Sink>)>,
    incidents: Option<Arc<Incidents>>,
}

impl LoggerBuilder {
    /// Add a sink receiving records whose `namespace/key` matches `pattern`.
    pub fn sink(mut self, pattern: impl Into<String>, sink: impl Sink + 'static) -> Self {
        self.routes.push((pattern.into(), Box::new(sink)));
        self
    }

    /// Add a sink receiving every record.
    pub fn all(self, sink: impl Sink + 'static) -> Self {
        self.sink(".*", sink)
    }

    /// Report sink failures to an existing incident log.
    pub fn incidents(mut self, incidents: Arc<Incidents>) -> Self {
        self.incidents = Some(incidents);
        self
    }

    pub fn build(self) -> Result<Logger, SinkError> {
        let routes = self
            .routes
            .into_iter()
            .map(|(pattern, sink)| {
                Ok(Mutex::new(Route {
                    pattern: Regex::new(&pattern)?,
                    sink,
                    failures: 0,
                }))
            })
            .collect::<Result<Vec<_>, SinkError>>()?;
        Ok(Logger {
            routes,
            incidents: self.incidents.unwrap_or_else(incidents),
        })
    }
}
