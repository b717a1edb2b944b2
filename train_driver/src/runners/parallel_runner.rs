//! Actor/learner driver.
//!
//! ```text
//!  actor thread                              learner thread
//! ┌──────────────────────┐                  ┌───────────────────────────┐
//! │ RunLoop(env_step)    │   TransitionQueue │ RunLoop(train_step)       │
//! │  ActorStep ── push ──┼──> [ bounded ] ──┼──> pop_batch ── LearnerStep│
//! │  actor_log           │                  │  learner_log  (env_step)  │
//! └──────────────────────┘                  │  eval_initial (env_step)  │
//!            │                              │  eval         (env_step)  │
//!            └──── env_step (atomic read) ──▶│  save         (clock)     │
//!                                           └───────────────────────────┘
//! ```
//!
//! The two units share only the queue, the counters, the logger and the
//! cancellation token. When either unit exits it closes the queue, which
//! lets the other one finish; when either fails it also cancels the run.
//!
//! The learner's `env_step` triggers cannot size its chunks, so the learner
//! loop trains one batch per request and ends a chunk whenever `env_step`
//! reaches the next log or eval boundary.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::actors::{Actor, ActorStep};
use crate::checkpoint::Checkpoint;
use crate::config::DriverConfig;
use crate::core::cancel::CancelToken;
use crate::core::counter::{counter, SharedCounter};
use crate::core::transition_queue::{SharedTransitionQueue, TransitionQueue};
use crate::error::{panic_message, CallbackError, DriverError, Result};
use crate::incident::{incidents, Incidents};
use crate::learner::{Learner, LearnerStep};
use crate::metrics::{training_metrics, MetricRecord, SharedLogger, SharedTrainingMetrics};
use crate::trigger::Trigger;

use super::run_loop::{RunLoop, RunStatus, RunSummary};
use super::schedule::{Phase, Scheduled};
use super::status::{pipeline_status, SharedPipelineStatus};
use super::training_runner::{
    eval_schedule, logger_for, publish_remaining, save_callback, Evaluator, SharedCheckpoint,
    SharedEvaluator,
};

/// Outcome of a parallel run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelSummary {
    pub actor: RunSummary,
    pub learner: RunSummary,
    /// Transitions accepted by the queue.
    pub pushed: u64,
    /// Transitions dropped by the queue.
    pub dropped: u64,
    /// Incidents reported during the run.
    pub incidents: u64,
}

impl ParallelSummary {
    /// Cancelled if either unit stopped because of cancellation.
    pub fn status(&self) -> RunStatus {
        if self.actor.status == RunStatus::Cancelled || self.learner.status == RunStatus::Cancelled
        {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        }
    }
}

/// Closes the queue when a unit exits and cancels the run if it panicked.
struct UnitGuard<T> {
    queue: SharedTransitionQueue<T>,
    cancel: CancelToken,
}

impl<T> Drop for UnitGuard<T> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.cancel.cancel();
        }
        self.queue.close();
    }
}

fn spawn_unit<T, F>(
    role: &'static str,
    queue: SharedTransitionQueue<T>,
    cancel: CancelToken,
    body: F,
) -> Result<JoinHandle<Result<RunSummary>>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<RunSummary> + Send + 'static,
{
    thread::Builder::new()
        .name(role.to_string())
        .spawn(move || {
            let _guard = UnitGuard {
                queue,
                cancel: cancel.clone(),
            };
            let result = body();
            if let Err(e) = &result {
                log::error!("{role} failed, cancelling run: {e}");
                cancel.cancel();
            }
            result
        })
        .map_err(|source| DriverError::Spawn { role, source })
}

fn join_unit(role: &'static str, handle: JoinHandle<Result<RunSummary>>) -> Result<RunSummary> {
    handle.join().unwrap_or_else(|payload| {
        Err(DriverError::Panicked {
            role,
            message: panic_message(payload.as_ref()),
        })
    })
}

/// Parallel driver: an actor thread and a learner thread joined by a
/// bounded transition queue.
pub struct ParallelDriver<T, A, L> {
    config: DriverConfig,
    actor: A,
    learner: L,
    env_step: SharedCounter,
    train_step: SharedCounter,
    actor_metrics: SharedTrainingMetrics,
    learner_metrics: SharedTrainingMetrics,
    logger: Option<SharedLogger>,
    incidents: Arc<Incidents>,
    evaluator: Option<SharedEvaluator>,
    checkpoint: Option<SharedCheckpoint>,
    save_trigger: Option<Trigger>,
    cancel: CancelToken,
    status: SharedPipelineStatus,
    _marker: PhantomData<fn() -> T>,
}

impl<T, A, L> ParallelDriver<T, A, L>
where
    T: Send + 'static,
    A: Actor<T> + 'static,
    L: Learner<T> + 'static,
{
    /// Validate `config` and create a driver.
    pub fn new(config: DriverConfig, actor: A, learner: L) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            actor,
            learner,
            env_step: counter("env_step"),
            train_step: counter("train_step"),
            actor_metrics: training_metrics(),
            learner_metrics: training_metrics(),
            logger: None,
            incidents: incidents(),
            evaluator: None,
            checkpoint: None,
            save_trigger: None,
            cancel: CancelToken::new(),
            status: pipeline_status(),
            _marker: PhantomData,
        })
    }

    /// Use existing counters, e.g. restored from a checkpoint.
    pub fn with_counters(mut self, env_step: SharedCounter, train_step: SharedCounter) -> Self {
        self.env_step = env_step;
        self.train_step = train_step;
        self
    }

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

    /// Override the learner's save trigger (defaults to `ClockSeconds(save_every)`).
    pub fn with_save_trigger(mut self, trigger: Trigger) -> Self {
        self.save_trigger = Some(trigger);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn env_step(&self) -> &SharedCounter {
        &self.env_step
    }

    pub fn train_step(&self) -> &SharedCounter {
        &self.train_step
    }

    pub fn status(&self) -> &SharedPipelineStatus {
        &self.status
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn incidents(&self) -> &Arc<Incidents> {
        &self.incidents
    }

    /// Run both units to completion or cancellation.
    ///
    /// Returns the first fatal error of either unit after both have exited
    /// and the logger has been flushed.
    pub fn run(self) -> Result<ParallelSummary> {
        let config = self.config;
        let logger = match self.logger {
            Some(logger) => logger,
            None => logger_for(&config, Arc::clone(&self.incidents))?,
        };

        let mut queue = TransitionQueue::new(
            config.queue_capacity,
            config.overflow,
            Arc::clone(&self.incidents),
        )
        .with_step_counter(Arc::clone(&self.env_step));
        if let Some(threshold) = config.stall_threshold() {
            queue = queue.with_stall_threshold(threshold);
        }
        let queue = Arc::new(queue);

        // Actor: env_step counter, agent-step budget.
        let actor_step = ActorStep::new(
            self.actor,
            Arc::clone(&queue),
            self.cancel.clone(),
            Arc::clone(&self.actor_metrics),
            Arc::clone(&self.status),
        );
        // Learner progress is published by the learner only.
        let actor_log = {
            let metrics = Arc::clone(&self.actor_metrics);
            let logger = Arc::clone(&logger);
            let queue = Arc::clone(&queue);
            move |step: u64| -> std::result::Result<(), CallbackError> {
                let mut records = metrics.lock().result(step, true);
                records.push(MetricRecord::new(step, "queue", "len", queue.len()));
                records.push(MetricRecord::new(step, "queue", "dropped", queue.dropped()));
                logger.publish_batch(&records);
                Ok(())
            }
        };
        let mut actor_loop = RunLoop::builder(Arc::clone(&self.env_step), actor_step)
            .role("actor")
            .max_chunk(config.max_chunk)
            .budget(config.agent_budget())
            .cancel(self.cancel.clone())
            .logger(Arc::clone(&logger))
            .incidents(Arc::clone(&self.incidents))
            .on(
                "actor_log",
                Phase::Log,
                Trigger::every(config.log_interval()),
                actor_log,
            )
            .build();

        // Learner: train_step counter, paced against env_step.
        let learner_step = LearnerStep::new(
            self.learner,
            Arc::clone(&queue),
            self.cancel.clone(),
            config.batch_size,
            Arc::clone(&self.learner_metrics),
            Arc::clone(&self.status),
        )
        .with_train_ratio(config.train_ratio, Arc::clone(&self.env_step));
        let learner_log = {
            let metrics = Arc::clone(&self.learner_metrics);
            let logger = Arc::clone(&logger);
            let train_step = Arc::clone(&self.train_step);
            move |env_step: u64| -> std::result::Result<(), CallbackError> {
                let mut records = metrics.lock().result(env_step, true);
                records.push(MetricRecord::new(
                    env_step,
                    "train",
                    "train_steps",
                    train_step.get(),
                ));
                logger.publish_batch(&records);
                Ok(())
            }
        };
        let mut learner_builder = RunLoop::builder(Arc::clone(&self.train_step), learner_step)
            .role("learner")
            .max_chunk(config.max_chunk)
            .budget(config.train_budget())
            .cancel(self.cancel.clone())
            .logger(Arc::clone(&logger))
            .incidents(Arc::clone(&self.incidents))
            .schedule(
                Scheduled::new(
                    "learner_log",
                    Phase::Log,
                    Trigger::every(config.log_interval()),
                    learner_log,
                )
                .reading(Arc::clone(&self.env_step)),
            );
        if let Some(evaluator) = &self.evaluator {
            for entry in eval_schedule(&config, evaluator, &logger, Some(&self.env_step)) {
                learner_builder = learner_builder.schedule(entry);
            }
        }
        let save = self
            .save_trigger
            .unwrap_or_else(|| Trigger::clock(config.save_every));
        let mut learner_loop = learner_builder
            .on(
                "save",
                Phase::Save,
                save,
                save_callback(self.checkpoint, Arc::clone(&logger)),
            )
            .build();

        log::info!(
            "starting actor/learner run (queue capacity {}, batch size {}, train ratio {})",
            queue.capacity(),
            config.batch_size,
            config.train_ratio
        );
        let actor_handle = spawn_unit("actor", Arc::clone(&queue), self.cancel.clone(), move || {
            actor_loop.run()
        })?;
        let learner_handle = match spawn_unit(
            "learner",
            Arc::clone(&queue),
            self.cancel.clone(),
            move || learner_loop.run(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                self.cancel.cancel();
                queue.close();
                let _ = join_unit("actor", actor_handle);
                return Err(e);
            }
        };

        let actor = join_unit("actor", actor_handle);
        let learner = join_unit("learner", learner_handle);
        let env_step = self.env_step.get();
        publish_remaining(&self.actor_metrics, &logger, env_step);
        publish_remaining(&self.learner_metrics, &logger, env_step);
        logger.flush();

        let (actor, learner) = match (actor, learner) {
            (Ok(actor), Ok(learner)) => (actor, learner),
            (Err(e), _) | (_, Err(e)) => return Err(e),
        };
        let summary = ParallelSummary {
            actor,
            learner,
            pushed: queue.pushed(),
            dropped: queue.dropped(),
            incidents: self.incidents.total(),
        };
        log::info!(
            "actor/learner run {:?}: {} env steps, {} train steps, {} dropped",
            summary.status(),
            self.env_step,
            self.train_step,
            summary.dropped
        );
        Ok(summary)
    }
}
