//! Namespace-aware metric accumulator.
//!
//! Step and train functions add samples between log firings; the log
//! callback drains them into records with `result(step, true)`. Draining
//! resets the accumulator so nothing is logged twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::record::{ImagePayload, MetricRecord, MetricValue};

/// Reduction applied to scalar samples between two drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Agg {
    #[default]
    Mean,
    Sum,
    Min,
    Max,
    Last,
}

#[derive(Debug, Clone)]
enum Slot {
    Scalar {
        agg: Agg,
        sum: f64,
        count: usize,
        min: f64,
        max: f64,
        last: f64,
    },
    Array(Vec<f64>),
    Image(ImagePayload),
}

impl Slot {
    fn scalar(agg: Agg) -> Self {
        Slot::Scalar {
            agg,
            sum: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: f64::NAN,
        }
    }

    fn value(&self) -> Option<MetricValue> {
        match self {
            Slot::Scalar {
                agg,
                sum,
                count,
                min,
                max,
                last,
            } => {
                if *count == 0 {
                    return None;
                }
                let v = match agg {
                    Agg::Mean => sum / *count as f64,
                    Agg::Sum => *sum,
                    Agg::Min => *min,
                    Agg::Max => *max,
                    Agg::Last => *last,
                };
                Some(MetricValue::Scalar(v))
            }
            Slot::Array(values) => Some(MetricValue::Array(values.clone())),
            Slot::Image(image) => Some(MetricValue::Image(image.clone())),
        }
    }
}

/// Accumulates samples keyed by `(namespace, key)`.
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    slots: BTreeMap<(String, String), Slot>,
    /// Non-finite scalar samples rejected since creation.
    filtered: usize,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar sample, averaged on drain.
    pub fn scalar(&mut self, namespace: &str, key: &str, value: f64) {
        self.scalar_with(namespace, key, value, Agg::Mean);
    }

    /// Add a scalar sample with an explicit reduction.
    ///
    /// The reduction of the first sample for a key wins until the next drain.
    /// Non-finite samples are counted and discarded.
    pub fn scalar_with(&mut self, namespace: &str, key: &str, value: f64, agg: Agg) {
        if !value.is_finite() {
            self.filtered += 1;
            return;
        }
        let slot = self
            .slots
            .entry((namespace.to_string(), key.to_string()))
            .or_insert_with(|| Slot::scalar(agg));
        // A scalar replaces an array or image stored under the same key.
        if !matches!(slot, Slot::Scalar { .. }) {
            *slot = Slot::scalar(agg);
        }
        if let Slot::Scalar {
            sum,
            count,
            min,
            max,
            last,
            ..
        } = slot
        {
            *sum += value;
            *count += 1;
            *min = min.min(value);
            *max = max.max(value);
            *last = value;
        }
    }

    /// Add several averaged scalars under one namespace.
    pub fn add<I, K>(&mut self, namespace: &str, samples: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        for (key, value) in samples {
            self.scalar(namespace, key.as_ref(), value);
        }
    }

    /// Store an array; the latest one wins.
    pub fn array(&mut self, namespace: &str, key: &str, values: Vec<f64>) {
        self.slots
            .insert((namespace.to_string(), key.to_string()), Slot::Array(values));
    }

    /// Store an image; the latest one wins.
    pub fn image(&mut self, namespace: &str, key: &str, image: ImagePayload) {
        self.slots
            .insert((namespace.to_string(), key.to_string()), Slot::Image(image));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filtered(&self) -> usize {
        self.filtered
    }

    /// Reduce every key into a record stamped with `step`.
    pub fn result(&mut self, step: u64, reset: bool) -> Vec<MetricRecord> {
        let records = self
            .slots
            .iter()
            .filter_map(|((namespace, key), slot)| {
                slot.value()
                    .map(|value| MetricRecord::new(step, namespace.as_str(), key.as_str(), value))
            })
            .collect();
        if reset {
            self.reset();
        }
        records
    }

    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

/// Accumulator shared between a step function and its log callback.
pub type SharedTrainingMetrics = Arc<Mutex<TrainingMetrics>>;

/// Create a new shared accumulator.
pub fn training_metrics() -> SharedTrainingMetrics {
    Arc::new(Mutex::new(TrainingMetrics::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_of(records: &[MetricRecord], full_key: &str) -> f64 {
        records
            .iter()
            .find(|r| r.full_key() == full_key)
            .and_then(|r| r.value.as_scalar())
            .unwrap()
    }

    #[test]
    fn test_mean_is_default() {
        let mut metrics = TrainingMetrics::new();
        metrics.scalar("train", "loss", 1.0);
        metrics.scalar("train", "loss", 3.0);
        let records = metrics.result(10, true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].step, 10);
        assert_eq!(scalar_of(&records, "train/loss"), 2.0);
    }

    #[test]
    fn test_reductions() {
        let mut metrics = TrainingMetrics::new();
        for v in [4.0, 1.0, 7.0] {
            metrics.scalar_with("episode", "sum", v, Agg::Sum);
            metrics.scalar_with("episode", "min", v, Agg::Min);
            metrics.scalar_with("episode", "max", v, Agg::Max);
            metrics.scalar_with("episode", "last", v, Agg::Last);
        }
        let records = metrics.result(0, false);
        assert_eq!(scalar_of(&records, "episode/sum"), 12.0);
        assert_eq!(scalar_of(&records, "episode/min"), 1.0);
        assert_eq!(scalar_of(&records, "episode/max"), 7.0);
        assert_eq!(scalar_of(&records, "episode/last"), 7.0);
    }

    #[test]
    fn test_result_with_reset_never_duplicates() {
        let mut metrics = TrainingMetrics::new();
        metrics.scalar("eval_episode", "avg_score", 42.0);
        assert_eq!(metrics.result(30, true).len(), 1);

        metrics.scalar("train", "train_loss", 0.5);
        let records = metrics.result(50, true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].full_key(), "train/train_loss");
    }

    #[test]
    fn test_result_without_reset_keeps_state() {
        let mut metrics = TrainingMetrics::new();
        metrics.scalar("train", "loss", 1.0);
        metrics.result(1, false);
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn test_non_finite_filtered() {
        let mut metrics = TrainingMetrics::new();
        metrics.scalar("train", "loss", f64::NAN);
        metrics.scalar("train", "loss", f64::INFINITY);
        assert!(metrics.is_empty());
        assert_eq!(metrics.filtered(), 2);

        metrics.scalar("train", "loss", 2.0);
        assert_eq!(scalar_of(&metrics.result(0, true), "train/loss"), 2.0);
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let mut metrics = TrainingMetrics::new();
        metrics.add("episode", [("score", 1.0)]);
        metrics.add("eval_episode", [("score", 2.0)]);
        let records = metrics.result(0, true);
        assert_eq!(records.len(), 2);
        assert_eq!(scalar_of(&records, "episode/score"), 1.0);
        assert_eq!(scalar_of(&records, "eval_episode/score"), 2.0);
    }

    #[test]
    fn test_array_and_image_latest_wins() {
        let mut metrics = TrainingMetrics::new();
        metrics.array("episode", "rewards", vec![1.0]);
        metrics.array("episode", "rewards", vec![1.0, 2.0]);
        metrics.image("eval", "frame", ImagePayload::new(1, 1, 1, vec![9]));
        let records = metrics.result(0, true);
        assert_eq!(records.len(), 2);
        let rewards = records.iter().find(|r| r.key == "rewards").unwrap();
        assert_eq!(rewards.value, MetricValue::Array(vec![1.0, 2.0]));
    }
}
