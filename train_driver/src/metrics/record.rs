//! Metric records routed through the logger.

use serde::Serialize;

/// Raw image payload (row-major, `channels` bytes per pixel).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePayload {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            data,
        }
    }
}

/// Value carried by a metric record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Array(Vec<f64>),
    Image(ImagePayload),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether line-oriented text sinks can represent this value.
    pub fn is_textual(&self) -> bool {
        !matches!(self, MetricValue::Image(_))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Scalar(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Scalar(v as f64)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Scalar(v as f64)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Scalar(v as f64)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Scalar(v as f64)
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(v: Vec<f64>) -> Self {
        MetricValue::Array(v)
    }
}

impl From<ImagePayload> for MetricValue {
    fn from(v: ImagePayload) -> Self {
        MetricValue::Image(v)
    }
}

/// One `(namespace/key, value, step)` sample.
///
/// The namespace is part of the key identity: `episode/score` and
/// `eval_episode/score` never collide.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub namespace: String,
    pub key: String,
    pub value: MetricValue,
    pub step: u64,
}

impl MetricRecord {
    pub fn new(
        step: u64,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<MetricValue>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.into(),
            step,
        }
    }

    /// Fully-qualified key used for sink matching: `namespace/key`.
    pub fn full_key(&self) -> String {
        if self.namespace.is_empty() {
            self.key.clone()
        } else {
            format!("{}/{}", self.namespace, self.key)
        }
    }
}
