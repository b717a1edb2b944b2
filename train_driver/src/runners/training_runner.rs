//! Single-process training driver.
//!
//! Wires the standard callbacks onto one [`RunLoop`]:
//!
//! | name           | phase | trigger                        |
//! |----------------|-------|--------------------------------|
//! | `log`          | Log   | `EveryN(log_every / repeat)`   |
//! | `eval_initial` | Eval  | `Once(0)` if `eval_initial`    |
//! | `eval`         | Eval  | `EveryN(eval_every / repeat)`  |
//! | `save`         | Save  | `ClockSeconds(save_every)`     |
//!
//! Evaluation triggers are only scheduled when an evaluator is attached.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::checkpoint::Checkpoint;
use crate::config::DriverConfig;
use crate::core::cancel::CancelToken;
use crate::core::counter::{counter, SharedCounter};
use crate::error::{CallbackError, Result};
use crate::incident::{incidents, Incidents};
use crate::metrics::{
    training_metrics, Logger, MetricValue, SharedLogger, SharedTrainingMetrics, TerminalSink,
};
use crate::trigger::Trigger;

use super::run_loop::{RunLoop, RunSummary};
use super::schedule::{Callback, Phase, Scheduled};
use super::step::StepFn;

/// Namespace evaluation results are published under.
pub const EVAL_NAMESPACE: &str = "eval_episode";

/// Metrics returned by one evaluation, keyed by metric name.
pub type EvalMetrics = BTreeMap<String, MetricValue>;

/// Evaluation harness invoked at eval-trigger firings.
pub trait Evaluator: Send {
    fn evaluate(&mut self, step: u64) -> Result<EvalMetrics, CallbackError>;
}

impl<F> Evaluator for F
where
    F: FnMut(u64) -> Result<EvalMetrics, CallbackError> + Send,
{
    fn evaluate(&mut self, step: u64) -> Result<EvalMetrics, CallbackError> {
        self(step)
    }
}

pub(crate) type SharedEvaluator = Arc<Mutex<Box<dyn Evaluator>>>;
pub(crate) type SharedCheckpoint = Arc<Mutex<Box<dyn Checkpoint>>>;

/// Build the logger described by `config`: the two JSONL streams when a
/// log directory is set, otherwise a terminal sink.
pub fn logger_for(config: &DriverConfig, incidents: Arc<Incidents>) -> Result<SharedLogger> {
    let logger = match &config.logdir {
        Some(logdir) => Logger::standard(logdir, &config.score_pattern, incidents)?,
        None => Logger::builder()
            .all(TerminalSink::stdout())
            .incidents(incidents)
            .build()?,
    };
    Ok(Arc::new(logger))
}

/// Drain `metrics` into `logger`, stamped with `step`.
pub(crate) fn log_callback(
    metrics: SharedTrainingMetrics,
    logger: SharedLogger,
) -> impl Callback + 'static {
    move |step: u64| -> Result<(), CallbackError> {
        let records = metrics.lock().result(step, true);
        logger.publish_batch(&records);
        Ok(())
    }
}

/// Publish what `metrics` accumulated since the last log firing.
///
/// Called once when a run ends, so a budget that is not a multiple of the
/// log interval does not lose its tail.
pub(crate) fn publish_remaining(metrics: &SharedTrainingMetrics, logger: &Logger, step: u64) {
    let records = metrics.lock().result(step, true);
    if !records.is_empty() {
        log::debug!("publishing {} trailing records at {step}", records.len());
        logger.publish_batch(&records);
    }
}

/// Run the evaluator and publish its results under [`EVAL_NAMESPACE`].
pub(crate) fn eval_callback(
    evaluator: SharedEvaluator,
    logger: SharedLogger,
) -> impl Callback + 'static {
    move |step: u64| -> Result<(), CallbackError> {
        let results = evaluator.lock().evaluate(step)?;
        logger.add(step, EVAL_NAMESPACE, results);
        Ok(())
    }
}

/// Flush sinks, then hand the step to the checkpoint callback.
pub(crate) fn save_callback(
    checkpoint: Option<SharedCheckpoint>,
    logger: SharedLogger,
) -> impl Callback + 'static {
    move |step: u64| -> Result<(), CallbackError> {
        logger.flush();
        match &checkpoint {
            Some(checkpoint) => checkpoint.lock().save(step),
            None => Ok(()),
        }
    }
}

/// Eval triggers for `config`, reading `counter`.
pub(crate) fn eval_schedule(
    config: &DriverConfig,
    evaluator: &SharedEvaluator,
    logger: &SharedLogger,
    counter: Option<&SharedCounter>,
) -> Vec<Scheduled> {
    let mut entries = Vec::new();
    if config.eval_initial {
        entries.push(Scheduled::new(
            "eval_initial",
            Phase::Eval,
            Trigger::once(0),
            eval_callback(Arc::clone(evaluator), Arc::clone(logger)),
        ));
    }
    entries.push(Scheduled::new(
        "eval",
        Phase::Eval,
        Trigger::every(config.eval_interval()),
        eval_callback(Arc::clone(evaluator), Arc::clone(logger)),
    ));
    match counter {
        Some(counter) => entries
            .into_iter()
            .map(|entry| entry.reading(Arc::clone(counter)))
            .collect(),
        None => entries,
    }
}

/// Single-process driver: one step function, one counter, one loop.
///
/// ```ignore
/// let metrics = training_metrics();
/// let agent_metrics = Arc::clone(&metrics);
/// let summary = TrainingDriver::new(config, move |n| {
///     agent_metrics.lock().scalar("episode", "score", run_env(n));
///     Ok(n)
/// })?
/// .with_metrics(metrics)
/// .with_evaluator(evaluate)
/// .run()?;
/// ```
pub struct TrainingDriver<S> {
    config: DriverConfig,
    step_fn: S,
    counter: SharedCounter,
    metrics: SharedTrainingMetrics,
    logger: Option<SharedLogger>,
    incidents: Arc<Incidents>,
    evaluator: Option<SharedEvaluator>,
    checkpoint: Option<SharedCheckpoint>,
    save_trigger: Option<Trigger>,
    cancel: CancelToken,
}

impl<S: StepFn> TrainingDriver<S> {
    /// Validate `config` and create a driver counting agent steps in `env_step`.
    pub fn new(config: DriverConfig, step_fn: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            step_fn,
            counter: counter("env_step"),
            metrics: training_metrics(),
            logger: None,
            incidents: incidents(),
            evaluator: None,
            checkpoint: None,
            save_trigger: None,
            cancel: CancelToken::new(),
        })
    }

    /// Use an existing counter, e.g. one restored from a checkpoint.
    pub fn with_counter(mut self, counter: SharedCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Accumulator drained at each log firing.
    pub fn with_metrics(mut self, metrics: SharedTrainingMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the logger built from the configuration.
    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.incidents = Arc::clone(logger.incidents());
        self.logger = Some(logger);
        self
    }

    pub fn with_incidents(mut self, incidents: Arc<Incidents>) -> Self {
        self.incidents = incidents;
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(Mutex::new(Box::new(evaluator))));
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Checkpoint + 'static) -> Self {
        self.checkpoint = Some(Arc::new(Mutex::new(Box::new(checkpoint))));
        self
    }

    /// Override the save trigger (defaults to `ClockSeconds(save_every)`).
    pub fn with_save_trigger(mut self, trigger: Trigger) -> Self {
        self.save_trigger = Some(trigger);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn counter(&self) -> &SharedCounter {
        &self.counter
    }

    pub fn metrics(&self) -> &SharedTrainingMetrics {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn incidents(&self) -> &Arc<Incidents> {
        &self.incidents
    }

    /// Run to the configured budget, exhaustion, or cancellation.
    ///
    /// Metrics accumulated after the last log firing are published at the
    /// final counter value before the closing flush, also on failure.
    pub fn run(self) -> Result<RunSummary> {
        let logger = match self.logger {
            Some(logger) => logger,
            None => logger_for(&self.config, Arc::clone(&self.incidents))?,
        };
        let config = &self.config;

        let mut builder = RunLoop::builder(Arc::clone(&self.counter), self.step_fn)
            .role("driver")
            .max_chunk(config.max_chunk)
            .budget(config.agent_budget())
            .cancel(self.cancel)
            .logger(Arc::clone(&logger))
            .incidents(self.incidents)
            .on(
                "log",
                Phase::Log,
                Trigger::every(config.log_interval()),
                log_callback(Arc::clone(&self.metrics), Arc::clone(&logger)),
            );
        if let Some(evaluator) = &self.evaluator {
            for entry in eval_schedule(config, evaluator, &logger, None) {
                builder = builder.schedule(entry);
            }
        }
        let save = self
            .save_trigger
            .unwrap_or_else(|| Trigger::clock(config.save_every));
        let mut run_loop = builder
            .on(
                "save",
                Phase::Save,
                save,
                save_callback(self.checkpoint, Arc::clone(&logger)),
            )
            .build();

        let result = run_loop.run();
        publish_remaining(&self.metrics, &logger, self.counter.get());
        logger.flush();
        result
    }
}
