//! Logger routing tests.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tempfile::tempdir;

use super::*;
use crate::incident::{incidents, IncidentKind};

/// In-memory sink whose batches stay visible after the logger takes it.
#[derive(Clone)]
struct MemorySink {
    name: String,
    batches: Arc<Mutex<Vec<Vec<MetricRecord>>>>,
    flushes: Arc<Mutex<usize>>,
    fail_writes: bool,
}

impl MemorySink {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            batches: Arc::new(Mutex::new(Vec::new())),
            flushes: Arc::new(Mutex::new(0)),
            fail_writes: false,
        }
    }

    fn failing(name: &str) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(name)
        }
    }

    fn keys(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(MetricRecord::full_key)
            .collect()
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        if self.fail_writes {
            return Err(SinkError::Disconnected(self.name.clone()));
        }
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        *self.flushes.lock() += 1;
        Ok(())
    }
}

fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_score_pattern_captures_every_episode_namespace() {
    let dir = tempdir().unwrap();
    let logger = Logger::builder()
        .all(JsonlSink::open("metrics", dir.path().join(METRICS_FILE)).unwrap())
        .sink(
            DEFAULT_SCORE_PATTERN,
            JsonlSink::open("scores", dir.path().join(SCORES_FILE)).unwrap(),
        )
        .build()
        .unwrap();

    logger.publish_batch(&[
        MetricRecord::new(10, "episode", "score", 1.0),
        MetricRecord::new(10, "episode", "length", 500u64),
    ]);
    logger.publish(MetricRecord::new(20, "eval_episode", "score", 2.0));
    logger.publish(MetricRecord::new(30, "train", "loss", 0.25));
    assert_eq!(logger.flush(), 0);

    let scores = read_lines(&dir.path().join(SCORES_FILE));
    assert_eq!(scores.len(), 2);
    assert_eq!(scores[0]["step"], 10);
    assert_eq!(scores[0]["episode/score"], 1.0);
    assert!(scores[0].get("episode/length").is_none());
    assert_eq!(scores[1]["step"], 20);
    assert_eq!(scores[1]["eval_episode/score"], 2.0);

    let all = read_lines(&dir.path().join(METRICS_FILE));
    assert_eq!(all.len(), 3);
    assert_eq!(all[0]["episode/length"], 500.0);
    assert_eq!(all[1]["eval_episode/score"], 2.0);
    assert_eq!(all[2]["train/loss"], 0.25);
}

#[test]
fn test_literal_pattern_misses_eval_scores() {
    // The anchored-at-start pattern only captures the training namespace.
    let sink = MemorySink::new("narrow");
    let logger = Logger::builder()
        .sink("^episode/score$", sink.clone())
        .build()
        .unwrap();

    logger.publish(MetricRecord::new(10, "episode", "score", 1.0));
    logger.publish(MetricRecord::new(20, "eval_episode", "score", 2.0));

    assert_eq!(sink.keys(), vec!["episode/score"]);
}

#[test]
fn test_flush_twice_writes_no_duplicates() {
    let dir = tempdir().unwrap();
    let logger = Logger::standard(dir.path(), DEFAULT_SCORE_PATTERN, incidents()).unwrap();

    logger.publish(MetricRecord::new(10, "episode", "score", 1.0));
    logger.flush();
    logger.flush();
    drop(logger);

    assert_eq!(read_lines(&dir.path().join(METRICS_FILE)).len(), 1);
    assert_eq!(read_lines(&dir.path().join(SCORES_FILE)).len(), 1);
}

#[test]
fn test_failing_sink_is_isolated() {
    let healthy = MemorySink::new("healthy");
    let log = incidents();
    let logger = Logger::builder()
        .all(MemorySink::failing("broken"))
        .all(healthy.clone())
        .incidents(Arc::clone(&log))
        .build()
        .unwrap();

    logger.publish(MetricRecord::new(1, "train", "loss", 0.5));
    logger.publish(MetricRecord::new(2, "train", "loss", 0.4));

    assert_eq!(healthy.keys().len(), 2);
    let reported = log.drain();
    assert_eq!(reported.len(), 2);
    assert!(reported.iter().all(|i| i.kind == IncidentKind::Sink && i.source == "broken"));
    assert_eq!(reported[0].step, 1);
    assert_eq!(reported[1].repeat, 2);
}

#[test]
fn test_namespaces_do_not_collide_at_same_step() {
    let sink = MemorySink::new("all");
    let logger = Logger::builder().all(sink.clone()).build().unwrap();

    logger.add(100, "episode", [("score", 1.0)]);
    logger.add(100, "eval_episode", [("score", 3.0)]);

    assert_eq!(sink.keys(), vec!["episode/score", "eval_episode/score"]);
}

#[test]
fn test_unmatched_records_do_not_reach_sink() {
    let sink = MemorySink::new("scores");
    let logger = Logger::builder()
        .sink(DEFAULT_SCORE_PATTERN, sink.clone())
        .build()
        .unwrap();

    logger.add(5, "train", [("loss", 0.1), ("lr", 0.001)]);
    assert!(sink.batches.lock().is_empty());
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let result = Logger::builder().sink("(unclosed", MemorySink::new("x")).build();
    assert!(matches!(result, Err(SinkError::Pattern(_))));
}

#[test]
fn test_flush_reaches_every_sink() {
    let a = MemorySink::new("a");
    let b = MemorySink::new("b");
    let logger = Logger::builder()
        .all(a.clone())
        .sink("never-matches", b.clone())
        .build()
        .unwrap();

    assert_eq!(logger.sink_names(), vec!["a", "b"]);
    logger.flush();
    assert_eq!(*a.flushes.lock(), 1);
    assert_eq!(*b.flushes.lock(), 1);
}

#[test]
fn test_training_metrics_drain_into_logger() {
    let sink = MemorySink::new("all");
    let logger = Logger::builder().all(sink.clone()).build().unwrap();
    let metrics = training_metrics();

    metrics.lock().scalar("train", "loss", 1.0);
    metrics.lock().scalar("train", "loss", 2.0);
    logger.publish_batch(&metrics.lock().result(50, true));
    logger.publish_batch(&metrics.lock().result(60, true));

    let batches = sink.batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].value, MetricValue::Scalar(1.5));
}
