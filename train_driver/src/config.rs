//! Driver configuration.
//!
//! Step-based intervals are given in environment steps and divided by
//! `action_repeat` before they reach a trigger, because the driver's
//! counters count agent steps.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::transition_queue::Overflow;
use crate::error::ConfigError;
use crate::metrics::DEFAULT_SCORE_PATTERN;

/// Configuration for [`TrainingDriver`](crate::runners::TrainingDriver) and
/// [`ParallelDriver`](crate::runners::ParallelDriver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    // Cadence
    /// Log interval in environment steps (≤ 0 disables).
    pub log_every: i64,
    /// Evaluation interval in environment steps (≤ 0 disables).
    pub eval_every: i64,
    /// Checkpoint interval in seconds (≤ 0 disables).
    pub save_every: f64,
    /// Run one evaluation before any training.
    pub eval_initial: bool,
    /// Environment steps per agent step.
    pub action_repeat: u64,
    /// Upper bound on steps per chunk.
    pub max_chunk: u64,
    /// Environment-step budget (0 = unbounded).
    pub total_steps: u64,

    // Parallel mode
    /// Transition queue capacity.
    pub queue_capacity: usize,
    /// Transitions per learner batch.
    pub batch_size: usize,
    /// Behaviour of a full transition queue.
    pub overflow: Overflow,
    /// Seconds a queue wait may last before a stall incident (0 disables).
    pub stall_threshold_secs: f64,
    /// Train steps per agent step (0 = train whenever a batch is ready).
    pub train_ratio: f64,
    /// Learner budget in train steps (0 = unbounded).
    pub max_train_steps: u64,

    // Output
    /// Directory for `metrics.jsonl` and `scores.jsonl`.
    pub logdir: Option<PathBuf>,
    /// Regex selecting records for `scores.jsonl`.
    pub score_pattern: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            log_every: 10_000,
            eval_every: 10_000,
            save_every: 900.0,
            eval_initial: true,
            action_repeat: 1,
            max_chunk: 100,
            total_steps: 0,

            queue_capacity: 1024,
            batch_size: 16,
            overflow: Overflow::Block,
            stall_threshold_secs: 30.0,
            train_ratio: 0.0,
            max_train_steps: 0,

            logdir: None,
            score_pattern: DEFAULT_SCORE_PATTERN.to_string(),
        }
    }
}

impl DriverConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_log_every(mut self, steps: i64) -> Self {
        self.log_every = steps;
        self
    }

    pub fn with_eval_every(mut self, steps: i64) -> Self {
        self.eval_every = steps;
        self
    }

    pub fn with_save_every(mut self, secs: f64) -> Self {
        self.save_every = secs;
        self
    }

    pub fn with_eval_initial(mut self, enabled: bool) -> Self {
        self.eval_initial = enabled;
        self
    }

    pub fn with_action_repeat(mut self, repeat: u64) -> Self {
        self.action_repeat = repeat;
        self
    }

    pub fn with_max_chunk(mut self, steps: u64) -> Self {
        self.max_chunk = steps;
        self
    }

    pub fn with_total_steps(mut self, steps: u64) -> Self {
        self.total_steps = steps;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_stall_threshold_secs(mut self, secs: f64) -> Self {
        self.stall_threshold_secs = secs;
        self
    }

    pub fn with_train_ratio(mut self, ratio: f64) -> Self {
        self.train_ratio = ratio;
        self
    }

    pub fn with_max_train_steps(mut self, steps: u64) -> Self {
        self.max_train_steps = steps;
        self
    }

    pub fn with_logdir(mut self, logdir: impl Into<PathBuf>) -> Self {
        self.logdir = Some(logdir.into());
        self
    }

    pub fn with_score_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.score_pattern = pattern.into();
        self
    }

    /// Validate configuration parameters.
    ///
    /// Non-positive cadence values are not errors; they disable the trigger.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.action_repeat == 0 {
            return Err(ConfigError::InvalidCount {
                field: "action_repeat",
                value: 0,
            });
        }
        if self.max_chunk == 0 {
            return Err(ConfigError::InvalidCount {
                field: "max_chunk",
                value: 0,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidCount {
                field: "queue_capacity",
                value: 0,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidCount {
                field: "batch_size",
                value: 0,
            });
        }
        if self.batch_size > self.queue_capacity {
            return Err(ConfigError::Invalid(format!(
                "batch_size ({}) must be <= queue_capacity ({})",
                self.batch_size, self.queue_capacity
            )));
        }
        if !(self.train_ratio.is_finite() && self.train_ratio >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "train_ratio",
                value: self.train_ratio,
                min: 0.0,
                max: f64::MAX,
            });
        }
        if self.stall_threshold_secs.is_nan() || self.stall_threshold_secs < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "stall_threshold_secs",
                value: self.stall_threshold_secs,
                min: 0.0,
                max: f64::MAX,
            });
        }
        check_seconds("save_every", self.save_every)?;
        check_seconds("stall_threshold_secs", self.stall_threshold_secs)?;
        Regex::new(&self.score_pattern)?;
        Ok(())
    }

    /// Convert an interval in environment steps to agent steps.
    ///
    /// Returns 0 (disabled) for non-positive input; an enabled interval
    /// never rounds down to 0.
    pub fn agent_interval(&self, env_steps: i64) -> i64 {
        if env_steps <= 0 {
            return 0;
        }
        let repeat = self.action_repeat.max(1) as i64;
        (env_steps / repeat).max(1)
    }

    /// Log interval in agent steps.
    pub fn log_interval(&self) -> i64 {
        self.agent_interval(self.log_every)
    }

    /// Evaluation interval in agent steps.
    pub fn eval_interval(&self) -> i64 {
        self.agent_interval(self.eval_every)
    }

    /// Agent-step budget, if bounded.
    pub fn agent_budget(&self) -> Option<u64> {
        (self.total_steps > 0).then(|| (self.total_steps / self.action_repeat.max(1)).max(1))
    }

    /// Learner budget, if bounded.
    pub fn train_budget(&self) -> Option<u64> {
        (self.max_train_steps > 0).then_some(self.max_train_steps)
    }

    /// Stall threshold, or `None` when stall detection is disabled.
    pub fn stall_threshold(&self) -> Option<Duration> {
        if self.stall_threshold_secs > 0.0 {
            Duration::try_from_secs_f64(self.stall_threshold_secs).ok()
        } else {
            None
        }
    }
}

/// A finite positive number of seconds must fit in a [`Duration`].
/// Infinite values are accepted and disable the timer.
fn check_seconds(field: &'static str, secs: f64) -> Result<(), ConfigError> {
    if secs.is_finite() && secs > 0.0 && Duration::try_from_secs_f64(secs).is_err() {
        return Err(ConfigError::OutOfRange {
            field,
            value: secs,
            min: 0.0,
            max: u64::MAX as f64,
        });
    }
    Ok(())
}
